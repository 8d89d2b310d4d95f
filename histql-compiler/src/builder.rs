//! Query tree builder.
//!
//! The grammar driver calls these semantic actions bottom-up as each
//! clause of the query closes. The builder maintains the active-table
//! scope, the alias registry, and the expression arena, and stamps every
//! expression with the scope it was created in.

use tracing::warn;

use crate::ast::{
    ArithOp, Expr, ExprArena, ExprId, ExprKind, LabelEntry, LabelValue, MatchCondition,
    QueryTree, Selection, Table, TableId,
};
use crate::error::{Error, Result};
use crate::intern::{Interner, Symbol};

/// Everything the builder produced for one compilation.
#[derive(Debug)]
pub struct Compilation {
    pub tree: QueryTree,
    pub arena: ExprArena,
    pub interner: Interner,
}

/// Builds the table/expression tree from grammar actions.
pub struct QueryBuilder {
    tree: QueryTree,
    arena: ExprArena,
    interner: Interner,
    /// Active table during construction; label lookups and expression
    /// scoping follow this, not lexical structure.
    current: Option<TableId>,
    anon_count: u32,
    warned_no_table: bool,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self {
            tree: QueryTree::new(),
            arena: ExprArena::new(),
            interner: Interner::new(),
            current: None,
            anon_count: 0,
            warned_no_table: false,
        }
    }

    /// Finish construction and hand the tree over for code generation.
    pub fn finish(self) -> Compilation {
        Compilation {
            tree: self.tree,
            arena: self.arena,
            interner: self.interner,
        }
    }

    /// Recoverable misuse: a mutation arrived with no active table. Logged
    /// once, the operation becomes a no-op.
    fn no_table(&mut self, action: &str) -> bool {
        if self.current.is_some() {
            return false;
        }
        if !self.warned_no_table {
            warn!(action, "semantic action with no active table; ignored");
            self.warned_no_table = true;
        }
        true
    }

    /// Table the next label belongs to: the active table, or the root when
    /// the action arrives after the root clause already closed.
    fn label_target(&self) -> Option<TableId> {
        self.current.or(self.tree.root)
    }

    /// Open a new table as a child of the active one (or as the root).
    pub fn table_start(&mut self) {
        let id = self.tree.push(Table {
            parent: self.current,
            ..Table::default()
        });
        if self.tree.root.is_none() {
            self.tree.root = Some(id);
        }
        self.current = Some(id);
    }

    /// Close the active table, naming and registering it, and pop back to
    /// its parent. A missing active table here is a grammar-driver bug.
    pub fn table_end(&mut self, name: Option<&str>) -> Result<()> {
        let id = self
            .current
            .ok_or_else(|| Error::invalid("table_end with no active table"))?;

        let name = match name {
            Some(n) => self.interner.intern(n),
            None => {
                let generated = format!("Anonymous{}", self.anon_count);
                self.anon_count += 1;
                self.interner.intern_owned(generated)
            }
        };

        self.tree.register_alias(name, id);
        let table = self.tree.table_mut(id);
        table.name = Some(name);
        self.current = table.parent;
        Ok(())
    }

    /// Close a table that itself is the FROM clause of its parent: the
    /// parent's `from` becomes a field expression naming this table.
    pub fn from_table_end(&mut self, name: &str) -> Result<()> {
        let parent = self
            .current
            .and_then(|id| self.tree.table(id).parent);
        self.table_end(Some(name))?;
        if let Some(parent) = parent {
            let expr = self.field(name, None);
            let display = self.display_name(expr);
            self.tree.table_mut(parent).from = Some(display);
        }
        Ok(())
    }

    /// Close a plain single-histogram statement. The table was already
    /// completed clause by clause; nothing more to record.
    pub fn simple_table_end(&mut self) {}

    /// Set the active table's FROM label from an expression's display form.
    pub fn add_from(&mut self, expr: ExprId) {
        if self.no_table("add_from") {
            return;
        }
        let display = self.display_name(expr);
        self.tree.table_mut(self.current.unwrap()).from = Some(display);
    }

    /// Set the active table's JOIN target from an expression's display form.
    pub fn add_to(&mut self, expr: ExprId) {
        if self.no_table("add_to") {
            return;
        }
        let display = self.display_name(expr);
        self.tree.table_mut(self.current.unwrap()).to = Some(display);
    }

    /// Append an equi-join condition from an ON clause.
    pub fn add_match(&mut self, a: &str, b: &str) {
        if self.no_table("add_match") {
            return;
        }
        let cond = MatchCondition {
            a: self.interner.intern(a),
            b: self.interner.intern(b),
        };
        self.tree
            .table_mut(self.current.unwrap())
            .matches
            .push(cond);
    }

    /// Bind a label to a literal string in the active table's scope.
    pub fn add_label(&mut self, label: &str, value: &str) {
        let Some(target) = self.label_target() else {
            self.no_table("add_label");
            return;
        };
        let entry = LabelEntry {
            label: self.interner.intern(label),
            value: LabelValue::Literal(self.interner.intern(value)),
        };
        self.tree.table_mut(target).labels.push(entry);
    }

    /// Bind a label to an expression and name the expression after it, so
    /// later rendering prefers the alias.
    pub fn add_expr(&mut self, label: &str, expr: ExprId) {
        let Some(target) = self.label_target() else {
            self.no_table("add_expr");
            return;
        };
        let name = self.interner.intern(label);
        let entry = LabelEntry {
            label: name,
            value: LabelValue::Expr(expr),
        };
        self.tree.table_mut(target).labels.push(entry);
        self.arena.get_mut(expr).name = Some(name);
    }

    /// Append an output column, preserving insertion order. Anonymous
    /// selections are named later by the code generator.
    pub fn add_selection(&mut self, expr: ExprId) {
        if self.no_table("add_selection") {
            return;
        }
        let selection = Selection {
            name: self.arena.get(expr).name,
            expr,
        };
        self.tree
            .table_mut(self.current.unwrap())
            .selections
            .push(selection);
    }

    /// Set the WHERE filter. A second filter on the same table is a
    /// recoverable semantic error: logged, and the first one is kept.
    pub fn add_where(&mut self, expr: ExprId) {
        if self.no_table("add_where") {
            return;
        }
        let table = self.tree.table_mut(self.current.unwrap());
        if table.filter.is_some() {
            warn!("more than one WHERE filter on a table; keeping the first");
            return;
        }
        table.filter = Some(expr);
    }

    // ---- expression builders -------------------------------------------

    /// Create a field expression, applying the `.USECS`/`.NSECS` timestamp
    /// sugar, and optionally bind it to a label.
    pub fn field(&mut self, path: &str, label: Option<&str>) -> ExprId {
        let rewritten;
        let path = if let Some(prefix) = path.strip_suffix(".USECS") {
            rewritten = format!("{}.common_timestamp.usecs", prefix);
            rewritten.as_str()
        } else if let Some(prefix) = path.strip_suffix(".NSECS") {
            rewritten = format!("{}.common_timestamp", prefix);
            rewritten.as_str()
        } else {
            path
        };

        let sym = self.interner.intern(path);
        let id = self.arena.alloc(Expr {
            kind: ExprKind::Field(sym),
            name: None,
            table: self.current,
        });
        if let Some(label) = label {
            self.add_expr(label, id);
        }
        id
    }

    pub fn plus(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.binary(ArithOp::Plus, left, right)
    }

    pub fn minus(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.binary(ArithOp::Minus, left, right)
    }

    pub fn mult(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.binary(ArithOp::Mult, left, right)
    }

    pub fn divide(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.binary(ArithOp::Divide, left, right)
    }

    fn binary(&mut self, op: ArithOp, left: ExprId, right: ExprId) -> ExprId {
        self.arena.alloc(Expr {
            kind: ExprKind::Binary { op, left, right },
            name: None,
            table: self.current,
        })
    }

    /// Create a WHERE comparison from raw operand strings.
    pub fn filter(&mut self, left: &str, right: &str, op: &str) -> ExprId {
        let left = self.field(left, None);
        let right = self.field(right, None);
        let op = self.interner.intern(op);
        self.arena.alloc(Expr {
            kind: ExprKind::Compare { left, op, right },
            name: None,
            table: self.current,
        })
    }

    /// Display handle of an expression: its alias when named, otherwise
    /// its field path (from/to labels are only ever fields or aliases).
    fn display_name(&mut self, expr: ExprId) -> Symbol {
        let node = self.arena.get(expr);
        if let Some(name) = node.name {
            return name;
        }
        match node.kind {
            ExprKind::Field(path) => path,
            _ => {
                let rendered = crate::resolver::Resolver::new(
                    &self.tree,
                    &self.arena,
                    &self.interner,
                )
                .render_display(expr);
                self.interner.intern_owned(rendered)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_table_naming() {
        let mut builder = QueryBuilder::new();
        builder.table_start();
        builder.table_end(None).unwrap();
        builder.table_start();
        builder.table_end(None).unwrap();

        let c = builder.finish();
        let names: Vec<&str> = c
            .tree
            .tables()
            .map(|(_, t)| c.interner.resolve(t.name.unwrap()))
            .collect();
        assert_eq!(names, vec!["Anonymous0", "Anonymous1"]);
    }

    #[test]
    fn test_table_end_without_table_is_fatal() {
        let mut builder = QueryBuilder::new();
        assert!(builder.table_end(None).is_err());
    }

    #[test]
    fn test_duplicate_where_keeps_first() {
        let mut builder = QueryBuilder::new();
        builder.table_start();
        let first = builder.filter("a.pid", "1", "==");
        let second = builder.filter("a.pid", "2", "!=");
        builder.add_where(first);
        builder.add_where(second);
        builder.table_end(None).unwrap();

        let c = builder.finish();
        let (_, table) = c.tree.tables().next().unwrap();
        assert_eq!(table.filter, Some(first));
    }

    #[test]
    fn test_mutation_without_table_is_noop() {
        let mut builder = QueryBuilder::new();
        let e = builder.field("a.pid", None);
        builder.add_selection(e);
        builder.add_match("a.pid", "b.next_pid");
        let c = builder.finish();
        assert_eq!(c.tree.tables().count(), 0);
    }

    #[test]
    fn test_timestamp_sugar() {
        let mut builder = QueryBuilder::new();
        builder.table_start();
        let usecs = builder.field("start.USECS", None);
        let nsecs = builder.field("start.NSECS", None);
        builder.table_end(None).unwrap();

        let c = builder.finish();
        let path = |id: ExprId| match c.arena.get(id).kind {
            ExprKind::Field(p) => c.interner.resolve(p).to_string(),
            _ => unreachable!(),
        };
        assert_eq!(path(usecs), "start.common_timestamp.usecs");
        assert_eq!(path(nsecs), "start.common_timestamp");
    }

    #[test]
    fn test_from_table_end_links_parent() {
        let mut builder = QueryBuilder::new();
        builder.table_start(); // outer
        builder.table_start(); // subquery in FROM
        builder.from_table_end("inner").unwrap();
        builder.table_end(Some("outer")).unwrap();

        let c = builder.finish();
        let root = c.tree.table(c.tree.root.unwrap());
        assert_eq!(c.interner.resolve(root.from.unwrap()), "inner");
        let inner = c.tree.find_table(root.from.unwrap()).unwrap();
        assert_eq!(
            c.interner.resolve(c.tree.table(inner).name.unwrap()),
            "inner"
        );
    }

    #[test]
    fn test_label_binding_names_expression() {
        let mut builder = QueryBuilder::new();
        builder.table_start();
        let e = builder.field("sched_waking.common_timestamp", Some("start_time"));
        builder.add_selection(e);
        builder.table_end(None).unwrap();

        let c = builder.finish();
        let (_, table) = c.tree.tables().next().unwrap();
        assert_eq!(
            c.interner.resolve(table.selections[0].name.unwrap()),
            "start_time"
        );
        assert_eq!(table.labels.len(), 1);
    }
}
