//! String interner
//!
//! All parsed and generated strings in one compilation are interned into a
//! single arena, so names and field paths are compared by handle identity
//! instead of by content. One [`Interner`] lives for exactly one
//! compilation; it is dropped wholesale with the query tree.

use ahash::AHashMap;

/// Canonical handle for an interned string. Two handles are equal iff the
/// underlying strings are equal content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

/// Deduplicating string arena.
#[derive(Debug, Default)]
pub struct Interner {
    map: AHashMap<String, Symbol>,
    strings: Vec<String>,
}

impl Interner {
    /// Create an empty interner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its canonical handle.
    pub fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&sym) = self.map.get(s) {
            return sym;
        }
        self.intern_owned(s.to_string())
    }

    /// Intern an already-owned string, avoiding a copy on first sight.
    pub fn intern_owned(&mut self, s: String) -> Symbol {
        if let Some(&sym) = self.map.get(s.as_str()) {
            return sym;
        }
        let sym = Symbol(self.strings.len() as u32);
        self.map.insert(s.clone(), sym);
        self.strings.push(s);
        sym
    }

    /// Resolve a handle back to its string content.
    pub fn resolve(&self, sym: Symbol) -> &str {
        &self.strings[sym.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_content_equal_handle() {
        let mut interner = Interner::new();
        let a = interner.intern("sched_switch.next_pid");
        let b = interner.intern_owned("sched_switch.next_pid".to_string());
        assert_eq!(a, b);
        assert_eq!(interner.resolve(a), "sched_switch.next_pid");
    }

    #[test]
    fn test_distinct_content_distinct_handle() {
        let mut interner = Interner::new();
        let a = interner.intern("sched_waking");
        let b = interner.intern("sched_waking2");
        assert_ne!(a, b);
    }
}
