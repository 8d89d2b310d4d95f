//! Label/alias resolution and expression rendering.
//!
//! A label is looked up in its table's own label list, never globally.
//! The active scope is an explicit parameter threaded through every call;
//! recursive renders pass the owning table of the label being rendered,
//! not the caller's scope.

use tracing::warn;

use crate::ast::{ExprArena, ExprId, ExprKind, LabelValue, QueryTree, TableId};
use crate::intern::Interner;

/// Alias chains longer than this are cyclic (a well-formed chain is
/// bounded by table depth); resolution stops and leaves the label as-is.
const MAX_RESOLVE_DEPTH: usize = 32;

/// Borrowing view over one compilation's tree for lookups and rendering.
pub struct Resolver<'a> {
    tree: &'a QueryTree,
    arena: &'a ExprArena,
    interner: &'a Interner,
}

impl<'a> Resolver<'a> {
    pub fn new(tree: &'a QueryTree, arena: &'a ExprArena, interner: &'a Interner) -> Self {
        Self {
            tree,
            arena,
            interner,
        }
    }

    /// Resolve a label within `table`'s scope.
    ///
    /// A literal binding yields its value; an expression binding yields the
    /// expression's raw rendering (scoped to `table`, not to the caller);
    /// an unbound label is returned unchanged - it is assumed to already be
    /// a literal event or field reference.
    pub fn resolve(&self, table: TableId, label: &str) -> String {
        self.resolve_at(table, label, 0)
    }

    fn resolve_at(&self, table: TableId, label: &str, depth: usize) -> String {
        if depth > MAX_RESOLVE_DEPTH {
            warn!(label, "cyclic alias chain; leaving label unresolved");
            return label.to_string();
        }
        // Later bindings shadow earlier ones.
        let entry = self
            .tree
            .table(table)
            .labels
            .iter()
            .rev()
            .find(|l| self.interner.resolve(l.label) == label);

        match entry.map(|l| l.value) {
            Some(LabelValue::Literal(value)) => self.interner.resolve(value).to_string(),
            Some(LabelValue::Expr(expr)) => self.render_raw_at(table, expr, depth + 1),
            None => label.to_string(),
        }
    }

    /// Expand a dotted `alias.field` path: resolve only the prefix before
    /// the first dot against `scope` and reassemble. A dotless path is
    /// resolved whole. Used for match-condition operands.
    pub fn expand(&self, scope: TableId, path: &str) -> String {
        self.expand_at(scope, path, 0)
    }

    fn expand_at(&self, scope: TableId, path: &str, depth: usize) -> String {
        match path.split_once('.') {
            Some((prefix, suffix)) => {
                format!("{}.{}", self.resolve_at(scope, prefix, depth), suffix)
            }
            None => self.resolve_at(scope, path, depth),
        }
    }

    /// Raw rendering: every field path fully expanded to its resolved
    /// dotted form. Named operands of compound expressions carry an
    /// `AS alias` annotation. Used for classification and protocol text.
    pub fn render_raw(&self, scope: TableId, expr: ExprId) -> String {
        self.render_raw_at(scope, expr, 0)
    }

    fn render_raw_at(&self, scope: TableId, expr: ExprId, depth: usize) -> String {
        match &self.arena.get(expr).kind {
            ExprKind::Field(path) => self.expand_at(scope, self.interner.resolve(*path), depth),
            ExprKind::Binary { op, left, right } => {
                self.connect_raw(scope, *left, *right, op.as_str(), depth)
            }
            ExprKind::Compare { left, op, right } => {
                self.connect_raw(scope, *left, *right, self.interner.resolve(*op), depth)
            }
        }
    }

    /// Display rendering: prefer an assigned alias, fall back to an
    /// operator-connected textual form. Field paths are not expanded.
    /// Debug/trace output and filter right-hand sides only.
    pub fn render_display(&self, expr: ExprId) -> String {
        let node = self.arena.get(expr);
        if let Some(name) = node.name {
            return self.interner.resolve(name).to_string();
        }
        match &node.kind {
            ExprKind::Field(path) => self.interner.resolve(*path).to_string(),
            ExprKind::Binary { op, left, right } => {
                self.connect_display(*left, *right, op.as_str())
            }
            ExprKind::Compare { left, op, right } => {
                self.connect_display(*left, *right, self.interner.resolve(*op))
            }
        }
    }

    fn connect_raw(
        &self,
        scope: TableId,
        left: ExprId,
        right: ExprId,
        op: &str,
        depth: usize,
    ) -> String {
        format!(
            "({} {} {})",
            self.raw_operand(scope, left, depth),
            op,
            self.raw_operand(scope, right, depth)
        )
    }

    fn raw_operand(&self, scope: TableId, expr: ExprId, depth: usize) -> String {
        let rendered = self.render_raw_at(scope, expr, depth);
        match self.arena.get(expr).name {
            Some(name) => format!("{} AS {}", rendered, self.interner.resolve(name)),
            None => rendered,
        }
    }

    fn connect_display(&self, left: ExprId, right: ExprId, op: &str) -> String {
        format!(
            "({} {} {})",
            self.render_display(left),
            op,
            self.render_display(right)
        )
    }
}
