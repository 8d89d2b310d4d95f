//! Query tree and expression model.
//!
//! Expressions and tables are arena-allocated and addressed by index;
//! cross-references never use owning pointers, and everything is dropped
//! wholesale at the end of one compilation. The tree is strictly
//! bottom-up: a child table never outlives or owns its parent.

use ahash::AHashMap;

use crate::intern::Symbol;

/// Index of a table in the [`QueryTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId(pub u32);

/// Index of an expression in the [`ExprArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

/// Arithmetic connective of a binary expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Plus,
    Minus,
    Mult,
    Divide,
}

impl ArithOp {
    /// Operator spelling used in both rendering modes and in trigger text.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArithOp::Plus => "+",
            ArithOp::Minus => "-",
            ArithOp::Mult => "*",
            ArithOp::Divide => "/",
        }
    }
}

/// Expression node payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprKind {
    /// A field path such as `start.pid` or a bare atom (`100`, `sched_waking`).
    Field(Symbol),
    /// Arithmetic over two sub-expressions.
    Binary {
        op: ArithOp,
        left: ExprId,
        right: ExprId,
    },
    /// A WHERE comparison; `op` is the comparator spelling (`==`, `<`, ...).
    Compare {
        left: ExprId,
        op: Symbol,
        right: ExprId,
    },
}

/// Expression node. `name` is the user alias (or a generated one) and
/// `table` is the scope the node was created in.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub name: Option<Symbol>,
    pub table: Option<TableId>,
}

/// Arena owning every expression of one compilation.
#[derive(Debug, Default)]
pub struct ExprArena {
    nodes: Vec<Expr>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(expr);
        id
    }

    pub fn get(&self, id: ExprId) -> &Expr {
        &self.nodes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.nodes[id.0 as usize]
    }
}

/// What a table-scoped label resolves to.
#[derive(Debug, Clone, Copy)]
pub enum LabelValue {
    /// A literal string, typically a raw event name.
    Literal(Symbol),
    /// A named expression.
    Expr(ExprId),
}

/// One alias binding in a table's label list.
#[derive(Debug, Clone, Copy)]
pub struct LabelEntry {
    pub label: Symbol,
    pub value: LabelValue,
}

/// Unresolved equi-join predicate from an ON clause. Both sides are
/// `alias.field` paths, resolved lazily against the owning table's labels.
#[derive(Debug, Clone, Copy)]
pub struct MatchCondition {
    pub a: Symbol,
    pub b: Symbol,
}

/// One output column. Order is significant: output column order is the
/// synthetic event's field order.
#[derive(Debug, Clone, Copy)]
pub struct Selection {
    /// Alias at selection time; anonymous selections are named during
    /// code generation.
    pub name: Option<Symbol>,
    pub expr: ExprId,
}

/// A query node: either a plain single-event histogram (`to` unset) or a
/// two-event join producing a synthetic event (`from` and `to` set).
#[derive(Debug, Default)]
pub struct Table {
    pub name: Option<Symbol>,
    pub parent: Option<TableId>,
    /// FROM label in display form: a raw event name or an alias.
    pub from: Option<Symbol>,
    /// JOIN label in display form, when present.
    pub to: Option<Symbol>,
    pub labels: Vec<LabelEntry>,
    pub matches: Vec<MatchCondition>,
    pub selections: Vec<Selection>,
    /// At most one WHERE comparison; a second one is a semantic error.
    pub filter: Option<ExprId>,
}

impl Table {
    /// A table with both ends set correlates two events.
    pub fn is_join(&self) -> bool {
        self.to.is_some()
    }
}

/// The full table tree of one compilation plus the global alias registry
/// mapping table names to nodes.
#[derive(Debug, Default)]
pub struct QueryTree {
    tables: Vec<Table>,
    pub root: Option<TableId>,
    aliases: AHashMap<Symbol, TableId>,
}

impl QueryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, table: Table) -> TableId {
        let id = TableId(self.tables.len() as u32);
        self.tables.push(table);
        id
    }

    pub fn table(&self, id: TableId) -> &Table {
        &self.tables[id.0 as usize]
    }

    pub fn table_mut(&mut self, id: TableId) -> &mut Table {
        &mut self.tables[id.0 as usize]
    }

    /// Register a completed table under its name.
    pub fn register_alias(&mut self, name: Symbol, id: TableId) {
        self.aliases.insert(name, id);
    }

    /// Find a table by registered name. Used to resolve `from`/`to` labels
    /// that refer to nested subqueries rather than raw trace events.
    pub fn find_table(&self, name: Symbol) -> Option<TableId> {
        self.aliases.get(&name).copied()
    }

    pub fn tables(&self) -> impl Iterator<Item = (TableId, &Table)> {
        self.tables
            .iter()
            .enumerate()
            .map(|(i, t)| (TableId(i as u32), t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interner;

    #[test]
    fn test_arena_indices_are_stable() {
        let mut interner = Interner::new();
        let mut arena = ExprArena::new();
        let path = interner.intern("sched_switch.next_pid");
        let a = arena.alloc(Expr {
            kind: ExprKind::Field(path),
            name: None,
            table: None,
        });
        let b = arena.alloc(Expr {
            kind: ExprKind::Binary {
                op: ArithOp::Minus,
                left: a,
                right: a,
            },
            name: None,
            table: None,
        });
        assert!(matches!(arena.get(a).kind, ExprKind::Field(p) if p == path));
        assert!(matches!(arena.get(b).kind, ExprKind::Binary { .. }));
    }

    #[test]
    fn test_alias_registry() {
        let mut interner = Interner::new();
        let mut tree = QueryTree::new();
        let id = tree.push(Table::default());
        let name = interner.intern("first");
        tree.register_alias(name, id);
        assert_eq!(tree.find_table(name), Some(id));
        assert_eq!(tree.find_table(interner.intern("second")), None);
    }
}
