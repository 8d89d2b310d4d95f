//! Trace-event metadata for the histql compiler.
//!
//! The code generator needs two answers about the local machine's trace
//! events: which subsystem an event belongs to (`sched_switch` lives under
//! `events/sched/`) and the declared C type of an event field (`pid_t`,
//! `unsigned long`, ...). This crate provides that lookup as the
//! [`EventMetadata`] trait, backed either by an [`EventRegistry`] populated
//! from a tracefs mount (or by hand, in tests) or by [`StubMetadata`] when
//! no tracefs is available.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

mod tracefs;

pub use tracefs::SchemaError;

/// Pseudo-field available on every event inside a hist trigger.
pub const COMMON_TIMESTAMP: &str = "common_timestamp";

/// Metadata source consulted during code generation.
///
/// Lookups are best-effort: a `None` answer degrades the emitted text to a
/// placeholder marker, it never aborts a compilation.
pub trait EventMetadata: Send + Sync {
    /// Subsystem the named event belongs to, e.g. `sched` for `sched_switch`.
    fn system_of(&self, event: &str) -> Option<&str>;

    /// Declared type string of a field, e.g. `pid_t` for `sched_switch.next_pid`.
    fn field_type(&self, event: &str, field: &str) -> Option<&str>;

    /// Whether this source holds any real event descriptions. A `false`
    /// answer makes the code generator use the fixed stub markers
    /// (`(system)`, `(unknown)`) instead of per-lookup miss diagnostics.
    fn has_metadata(&self) -> bool {
        true
    }
}

/// A single field of a trace event format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name, e.g. `next_pid`.
    pub name: String,
    /// Declared C type string, e.g. `pid_t` or `unsigned long`.
    pub type_name: String,
}

/// A trace event and the subsystem it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDef {
    /// Event name, e.g. `sched_switch`.
    pub name: String,
    /// Subsystem directory name, e.g. `sched`.
    pub system: String,
    /// Declared fields, in format-file order.
    pub fields: Vec<FieldDef>,
}

impl EventDef {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// In-memory registry of trace event formats, keyed by event name.
///
/// Event names are unique across systems in tracefs, so a flat map is
/// sufficient.
#[derive(Debug, Default, Clone)]
pub struct EventRegistry {
    events: AHashMap<String, EventDef>,
}

impl EventRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate a registry by scanning `events/<system>/<event>/format`
    /// files under a tracefs mount point.
    pub fn from_tracefs(dir: &std::path::Path) -> Result<Self, SchemaError> {
        tracefs::load_events(dir)
    }

    /// Register an event definition, replacing any previous definition of
    /// the same event.
    pub fn register_event(&mut self, def: EventDef) {
        self.events.insert(def.name.clone(), def);
    }

    /// Look up an event by name.
    pub fn get_event(&self, name: &str) -> Option<&EventDef> {
        self.events.get(name)
    }

    /// Number of registered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the registry holds no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventMetadata for EventRegistry {
    fn system_of(&self, event: &str) -> Option<&str> {
        self.events.get(event).map(|e| e.system.as_str())
    }

    fn field_type(&self, event: &str, field: &str) -> Option<&str> {
        self.events
            .get(event)?
            .field(field)
            .map(|f| f.type_name.as_str())
    }

    fn has_metadata(&self) -> bool {
        !self.events.is_empty()
    }
}

/// Metadata source that knows nothing. Used when tracefs cannot be read;
/// every lookup degrades to the stub markers.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubMetadata;

impl EventMetadata for StubMetadata {
    fn system_of(&self, _event: &str) -> Option<&str> {
        None
    }

    fn field_type(&self, _event: &str, _field: &str) -> Option<&str> {
        None
    }

    fn has_metadata(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sched_switch() -> EventDef {
        EventDef {
            name: "sched_switch".to_string(),
            system: "sched".to_string(),
            fields: vec![
                FieldDef {
                    name: "prev_pid".to_string(),
                    type_name: "pid_t".to_string(),
                },
                FieldDef {
                    name: "next_pid".to_string(),
                    type_name: "pid_t".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_registry_lookups() {
        let mut registry = EventRegistry::new();
        registry.register_event(sched_switch());

        assert_eq!(registry.system_of("sched_switch"), Some("sched"));
        assert_eq!(
            registry.field_type("sched_switch", "next_pid"),
            Some("pid_t")
        );
        assert_eq!(registry.field_type("sched_switch", "missing"), None);
        assert_eq!(registry.system_of("sched_waking"), None);
        assert!(registry.has_metadata());
    }

    #[test]
    fn test_stub_metadata() {
        let stub = StubMetadata;
        assert_eq!(stub.system_of("sched_switch"), None);
        assert_eq!(stub.field_type("sched_switch", "next_pid"), None);
        assert!(!stub.has_metadata());
    }

    #[test]
    fn test_empty_registry_reports_no_metadata() {
        let registry = EventRegistry::new();
        assert!(!registry.has_metadata());
    }
}
