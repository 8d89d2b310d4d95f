//! Code generator: lowers the query tree into hist-trigger protocol text.
//!
//! A plain table becomes one histogram trigger. A join table becomes a
//! correlated pair: a start trigger on the `from` event that saves values
//! into histogram variables, and an end trigger on the `to` event that
//! references them via `$name`, fires `onmatch`, and traces a synthetic
//! event. Selection naming and variable capture run as a classification
//! pass over all selections before any trigger text is emitted, so the
//! synthetic definition, the start-trigger declarations and the `.trace()`
//! list always agree.

use serde::{Deserialize, Serialize};

use histql_schema::{EventMetadata, COMMON_TIMESTAMP};

use crate::ast::{ExprArena, ExprId, ExprKind, QueryTree, TableId};
use crate::builder::Compilation;
use crate::error::{Error, Result};
use crate::intern::Interner;
use crate::resolver::Resolver;

/// Marker used when the metadata source cannot name an event's subsystem.
const UNKNOWN_SYSTEM: &str = "(system)";
/// Marker used for field types when no metadata is available at all.
const UNKNOWN_TYPE: &str = "(unknown)";
/// Selections whose resolved name starts with this prefix are grouping
/// keys, not value columns.
const KEY_PREFIX: &str = "key";

/// A synthetic event registration: `<name> <type> <field> ...`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticEvent {
    pub name: String,
    pub definition: String,
}

/// Which half of a correlation a trigger implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerRole {
    /// Only trigger of a plain single-event histogram.
    Single,
    /// First trigger of a join; declares the histogram variables.
    Start,
    /// Second trigger of a join; carries `onmatch`/`trace`.
    End,
}

/// One trigger: the `hist:...` content string and its target path under
/// the tracefs events tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub role: TriggerRole,
    pub content: String,
    pub path: String,
}

/// Result of one compilation: the trigger program in emission order
/// (nested subqueries before the tables that reference them).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub synthetic_events: Vec<SyntheticEvent>,
    pub triggers: Vec<Trigger>,
}

impl CompiledQuery {
    /// Whether the query correlates two events.
    pub fn is_join(&self) -> bool {
        !self.synthetic_events.is_empty()
    }

    /// The outermost join's synthetic event, if any.
    pub fn synthetic_event(&self) -> Option<&SyntheticEvent> {
        self.synthetic_events.last()
    }

    pub fn start_trigger(&self) -> Option<&Trigger> {
        self.triggers.iter().find(|t| t.role == TriggerRole::Start)
    }

    pub fn end_trigger(&self) -> Option<&Trigger> {
        self.triggers.iter().find(|t| t.role == TriggerRole::End)
    }

    pub fn single_trigger(&self) -> Option<&Trigger> {
        self.triggers.iter().find(|t| t.role == TriggerRole::Single)
    }

    /// Render the whole program as the shell commands that install it.
    pub fn to_shell_script(&self) -> String {
        let mut script = String::new();
        for ev in &self.synthetic_events {
            script.push_str(&format!("echo '{}' > synthetic_events\n", ev.definition));
        }
        for trigger in &self.triggers {
            script.push_str(&format!("echo '{}' > {}\n", trigger.content, trigger.path));
        }
        script
    }
}

/// A field belongs to an event iff the path prefix up to the first dot
/// equals the event name exactly. Returns the bare field suffix. This is
/// the single classification primitive behind key/value placement, filter
/// placement, variable capture and literal-vs-`$var` rendering.
pub fn event_match<'p>(event: &str, path: &'p str) -> Option<&'p str> {
    path.strip_prefix(event)?.strip_prefix('.')
}

/// Histogram variable captured by a start trigger: the fully resolved
/// field path it saves and the `$name` it is read back under.
#[derive(Debug)]
struct Var {
    path: String,
    name: String,
}

/// Classification of one selection relative to the join's two events.
#[derive(Debug)]
enum SelRole {
    /// Pass-through of a `to`-side field; rendered literally.
    ToField { bare: String },
    /// Pass-through of a `from`-side field, captured as a variable.
    FromField { var_index: usize, introduces: bool },
    /// Key-prefixed `from`-side field; a grouping key, and still declared
    /// as a variable so the `.trace()` list can reference it.
    FromKey {
        bare: String,
        var_index: usize,
        introduces: bool,
    },
    /// Arithmetic mixing fields; `from`-side leaves listed by var index.
    Composite { intro_vars: Vec<usize> },
    /// Field belonging to neither event (alias chains into nested scopes).
    Foreign,
}

#[derive(Debug)]
struct PlannedSel {
    expr: ExprId,
    out_name: String,
    is_key: bool,
    role: SelRole,
}

/// Everything decided up front for one join table.
struct JoinPlan {
    synth_name: String,
    from: String,
    to: String,
    from_event: String,
    to_event: String,
    selections: Vec<PlannedSel>,
    vars: Vec<Var>,
}

/// Walks the table tree in dependency order and emits trigger text.
pub struct CodeGenerator<'a> {
    tree: &'a QueryTree,
    arena: &'a ExprArena,
    interner: &'a Interner,
    metadata: &'a dyn EventMetadata,
    /// Anonymous-argument counter; reset per compilation so generated
    /// `__argN__` names are deterministic.
    arg_count: u32,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(compilation: &'a Compilation, metadata: &'a dyn EventMetadata) -> Self {
        Self {
            tree: &compilation.tree,
            arena: &compilation.arena,
            interner: &compilation.interner,
            metadata,
            arg_count: 0,
        }
    }

    pub fn generate(&mut self) -> Result<CompiledQuery> {
        let root = self
            .tree
            .root
            .ok_or_else(|| Error::invalid("query produced no table"))?;
        let mut out = CompiledQuery::default();
        self.gen_table(root, &mut out)?;
        Ok(out)
    }

    fn resolver(&self) -> Resolver<'a> {
        Resolver::new(self.tree, self.arena, self.interner)
    }

    /// Emit a table, recursing into subqueries referenced by its `from`
    /// and `to` labels first so their events exist before being referenced.
    fn gen_table(&mut self, id: TableId, out: &mut CompiledQuery) -> Result<()> {
        let table = self.tree.table(id);
        let from_child = table.from.and_then(|f| self.tree.find_table(f));
        let to_child = table.to.and_then(|t| self.tree.find_table(t));

        if let Some(child) = from_child {
            self.gen_table(child, out)?;
        }

        if table.is_join() {
            self.gen_join(id, out)?;
        } else {
            self.gen_leaf(id, out)?;
        }

        if let Some(child) = to_child {
            self.gen_table(child, out)?;
        }
        Ok(())
    }

    // ---- plain single-event histogram ----------------------------------

    fn gen_leaf(&mut self, id: TableId, out: &mut CompiledQuery) -> Result<()> {
        let table = self.tree.table(id);
        let r = self.resolver();
        let from_label = table
            .from
            .ok_or_else(|| Error::invalid("table has no FROM event"))?;
        let from = r.resolve(id, self.interner.resolve(from_label));
        let event = event_prefix(&from);

        let mut keys = Vec::new();
        let mut values = Vec::new();
        for sel in &table.selections {
            let raw = r.render_raw(id, sel.expr);
            let name = sel
                .name
                .or(self.arena.get(sel.expr).name)
                .map(|s| self.interner.resolve(s));
            let rendered = match event_match(event, &raw) {
                Some(bare) => bare.to_string(),
                None => raw,
            };
            if name.is_some_and(|n| n.starts_with(KEY_PREFIX)) {
                keys.push(rendered);
            } else {
                values.push(rendered);
            }
        }

        let mut content = format!("hist:keys={}", keys.join(","));
        if !values.is_empty() {
            content.push_str(":values=");
            content.push_str(&values.join(","));
        }
        content.push_str(&self.filter_clause(id, event));

        out.triggers.push(Trigger {
            role: TriggerRole::Single,
            content,
            path: format!("events/{}/trigger", self.system_event(&from, '/')),
        });
        Ok(())
    }

    // ---- two-event join ------------------------------------------------

    fn gen_join(&mut self, id: TableId, out: &mut CompiledQuery) -> Result<()> {
        let plan = self.plan_join(id)?;

        out.synthetic_events.push(SyntheticEvent {
            name: plan.synth_name.clone(),
            definition: self.synthetic_definition(id, &plan),
        });
        out.triggers.push(self.start_trigger(id, &plan));
        out.triggers.push(self.end_trigger(id, &plan));
        // The variable table in `plan` dies here; nothing carries over to
        // the next join table.
        Ok(())
    }

    /// First pass: resolve both events, name every selection, and decide
    /// which `from`-side field paths become histogram variables. Each path
    /// is declared at most once; later selections reuse the first variable.
    fn plan_join(&mut self, id: TableId) -> Result<JoinPlan> {
        let table = self.tree.table(id);
        let r = self.resolver();

        let from_label = table
            .from
            .ok_or_else(|| Error::invalid("join table has no FROM event"))?;
        let from = r.resolve(id, self.interner.resolve(from_label));
        let to_label = table
            .to
            .ok_or_else(|| Error::invalid("join table has no JOIN event"))?;
        let to = r.resolve(id, self.interner.resolve(to_label));
        let from_event = event_prefix(&from).to_string();
        let to_event = event_prefix(&to).to_string();
        let synth_name = table
            .name
            .map(|s| self.interner.resolve(s).to_string())
            .ok_or_else(|| Error::invalid("join table was never named"))?;

        let mut vars: Vec<Var> = Vec::new();
        let mut selections = Vec::new();

        for sel in &table.selections {
            let node = self.arena.get(sel.expr);
            let alias = sel
                .name
                .or(node.name)
                .map(|s| self.interner.resolve(s).to_string());

            let (out_name, role) = match &node.kind {
                ExprKind::Field(path) => {
                    let raw = r.expand(id, self.interner.resolve(*path));
                    if let Some(bare) = event_match(&to_event, &raw) {
                        // Prefer the foreign field's bare name for an
                        // unqualified pass-through.
                        let out_name = alias.unwrap_or_else(|| bare.to_string());
                        let role = SelRole::ToField {
                            bare: bare.to_string(),
                        };
                        (out_name, role)
                    } else if let Some(bare) = event_match(&from_event, &raw) {
                        let bare = bare.to_string();
                        let out_name = match alias {
                            Some(a) => a,
                            None => self.fresh_arg(),
                        };
                        let (var_index, introduces) =
                            match vars.iter().position(|v| v.path == raw) {
                                Some(i) => (i, false),
                                None => {
                                    vars.push(Var {
                                        path: raw,
                                        name: out_name.clone(),
                                    });
                                    (vars.len() - 1, true)
                                }
                            };
                        let role = if out_name.starts_with(KEY_PREFIX) {
                            SelRole::FromKey {
                                bare,
                                var_index,
                                introduces,
                            }
                        } else {
                            SelRole::FromField {
                                var_index,
                                introduces,
                            }
                        };
                        (out_name, role)
                    } else {
                        let out_name = match alias {
                            Some(a) => a,
                            None => self.fresh_arg(),
                        };
                        (out_name, SelRole::Foreign)
                    }
                }
                _ => {
                    let out_name = match alias {
                        Some(a) => a,
                        None => self.fresh_arg(),
                    };
                    let mut intro_vars = Vec::new();
                    self.collect_from_vars(id, sel.expr, &from_event, &mut vars, &mut intro_vars);
                    (out_name, SelRole::Composite { intro_vars })
                }
            };

            let is_key = out_name.starts_with(KEY_PREFIX);
            selections.push(PlannedSel {
                expr: sel.expr,
                out_name,
                is_key,
                role,
            });
        }

        Ok(JoinPlan {
            synth_name,
            from,
            to,
            from_event,
            to_event,
            selections,
            vars,
        })
    }

    /// Capture every `from`-side field referenced inside a composite value
    /// expression as a histogram variable, deduplicated by resolved path.
    fn collect_from_vars(
        &mut self,
        scope: TableId,
        expr: ExprId,
        from_event: &str,
        vars: &mut Vec<Var>,
        intro: &mut Vec<usize>,
    ) {
        let node = self.arena.get(expr);
        match &node.kind {
            ExprKind::Field(path) => {
                let raw = self.resolver().expand(scope, self.interner.resolve(*path));
                if event_match(from_event, &raw).is_none() {
                    return;
                }
                if vars.iter().any(|v| v.path == raw) {
                    return;
                }
                let name = match node.name {
                    Some(n) => self.interner.resolve(n).to_string(),
                    None => self.fresh_arg(),
                };
                vars.push(Var { path: raw, name });
                intro.push(vars.len() - 1);
            }
            ExprKind::Binary { left, right, .. } | ExprKind::Compare { left, right, .. } => {
                let (left, right) = (*left, *right);
                self.collect_from_vars(scope, left, from_event, vars, intro);
                self.collect_from_vars(scope, right, from_event, vars, intro);
            }
        }
    }

    fn start_trigger(&self, id: TableId, plan: &JoinPlan) -> Trigger {
        let mut keys = self.match_keys(id, &plan.from_event);
        for sel in &plan.selections {
            if let SelRole::FromKey { bare, .. } = &sel.role {
                if !keys.contains(bare) {
                    keys.push(bare.clone());
                }
            }
        }

        let mut content = format!("hist:keys={}", keys.join(","));
        let mut first = true;
        for sel in &plan.selections {
            match &sel.role {
                SelRole::FromField {
                    var_index,
                    introduces: true,
                }
                | SelRole::FromKey {
                    var_index,
                    introduces: true,
                    ..
                } => {
                    let var = &plan.vars[*var_index];
                    let bare = event_match(&plan.from_event, &var.path).unwrap_or(&var.path);
                    push_value_delim(&mut content, &mut first);
                    content.push_str(&format!("{}={}", var.name, bare));
                }
                SelRole::Composite { intro_vars } if !sel.is_key => {
                    for &vi in intro_vars {
                        let var = &plan.vars[vi];
                        let bare = event_match(&plan.from_event, &var.path).unwrap_or(&var.path);
                        push_value_delim(&mut content, &mut first);
                        content.push_str(&format!("{}={}", var.name, bare));
                    }
                }
                _ => {}
            }
        }
        content.push_str(&self.filter_clause(id, &plan.from_event));

        Trigger {
            role: TriggerRole::Start,
            content,
            path: format!("events/{}/trigger", self.system_event(&plan.from, '/')),
        }
    }

    fn end_trigger(&self, id: TableId, plan: &JoinPlan) -> Trigger {
        let mut keys = self.match_keys(id, &plan.to_event);
        for sel in &plan.selections {
            if sel.is_key {
                if let SelRole::ToField { bare } = &sel.role {
                    if !keys.contains(bare) {
                        keys.push(bare.clone());
                    }
                }
            }
        }

        let mut content = format!("hist:keys={}", keys.join(","));
        let mut first = true;
        for sel in &plan.selections {
            if sel.is_key {
                continue;
            }
            if let SelRole::Composite { .. } = sel.role {
                push_value_delim(&mut content, &mut first);
                content.push_str(&format!("{}=", sel.out_name));
                content.push_str(&self.render_to_expr(id, sel.expr, plan));
            }
        }

        content.push_str(&format!(
            ":onmatch({})",
            self.system_event(&plan.from, '.')
        ));
        content.push_str(&format!(".trace({}", plan.synth_name));
        for sel in &plan.selections {
            content.push(',');
            content.push_str(&self.trace_field(sel, plan));
        }
        content.push(')');
        content.push_str(&self.filter_clause(id, &plan.to_event));

        Trigger {
            role: TriggerRole::End,
            content,
            path: format!("events/{}/trigger", self.system_event(&plan.to, '/')),
        }
    }

    /// Render a composite value in end-trigger position: `to`-side fields
    /// literally, `from`-side fields as `$variable`, bare atoms verbatim.
    fn render_to_expr(&self, scope: TableId, expr: ExprId, plan: &JoinPlan) -> String {
        let node = self.arena.get(expr);
        match &node.kind {
            ExprKind::Field(path) => {
                let raw = self.resolver().expand(scope, self.interner.resolve(*path));
                if let Some(bare) = event_match(&plan.to_event, &raw) {
                    return bare.to_string();
                }
                if raw.contains('.') {
                    let var = plan
                        .vars
                        .iter()
                        .find(|v| v.path == raw)
                        .map(|v| v.name.clone())
                        .or_else(|| node.name.map(|n| self.interner.resolve(n).to_string()))
                        .unwrap_or_else(|| raw.split_once('.').unwrap().1.to_string());
                    return format!("${}", var);
                }
                // A dotless atom is a literal operand.
                raw
            }
            ExprKind::Binary { op, left, right } => format!(
                "{}{}{}",
                self.render_to_expr(scope, *left, plan),
                op.as_str(),
                self.render_to_expr(scope, *right, plan)
            ),
            ExprKind::Compare { left, op, right } => format!(
                "{}{}{}",
                self.render_to_expr(scope, *left, plan),
                self.interner.resolve(*op),
                self.render_to_expr(scope, *right, plan)
            ),
        }
    }

    /// One entry of the `.trace(...)` field list, following selection
    /// order: literal field if it belongs to the `to` event, `$name`
    /// otherwise.
    fn trace_field(&self, sel: &PlannedSel, plan: &JoinPlan) -> String {
        match &sel.role {
            SelRole::ToField { bare } => bare.clone(),
            SelRole::FromField { var_index, .. } | SelRole::FromKey { var_index, .. } => {
                format!("${}", plan.vars[*var_index].name)
            }
            _ => format!("${}", sel.out_name),
        }
    }

    /// Keys from the match conditions that belong to the given event side.
    fn match_keys(&self, id: TableId, event: &str) -> Vec<String> {
        let r = self.resolver();
        let mut keys = Vec::new();
        for cond in &self.tree.table(id).matches {
            for operand in [cond.a, cond.b] {
                let expanded = r.expand(id, self.interner.resolve(operand));
                if let Some(field) = event_match(event, &expanded) {
                    keys.push(field.to_string());
                }
            }
        }
        keys
    }

    /// ` if <field> <op> <value>` when the table has a WHERE filter whose
    /// left operand belongs to the given event; empty otherwise.
    fn filter_clause(&self, id: TableId, event: &str) -> String {
        let table = self.tree.table(id);
        let Some(filter) = table.filter else {
            return String::new();
        };
        let r = self.resolver();
        let ExprKind::Compare { left, op, right } = &self.arena.get(filter).kind else {
            return "<NOT A FILTER>".to_string();
        };
        let raw = r.render_raw(id, *left);
        match event_match(event, &raw) {
            Some(field) => format!(
                " if {} {} {}",
                field,
                self.interner.resolve(*op),
                r.render_display(*right)
            ),
            None => String::new(),
        }
    }

    /// `<name> <type> <out> <type> <out> ...` in selection order.
    fn synthetic_definition(&self, id: TableId, plan: &JoinPlan) -> String {
        let mut def = plan.synth_name.clone();
        for sel in &plan.selections {
            def.push_str(&format!(
                " {} {}",
                self.type_of(id, sel.expr),
                sel.out_name
            ));
        }
        def
    }

    /// Infer the synthetic field type from the leftmost field reference of
    /// the selection expression. Lookup misses degrade to visible markers
    /// instead of aborting.
    fn type_of(&self, scope: TableId, expr: ExprId) -> String {
        let mut e = expr;
        loop {
            match &self.arena.get(e).kind {
                ExprKind::Field(_) => break,
                ExprKind::Binary { left, .. } | ExprKind::Compare { left, .. } => e = *left,
            }
        }
        let raw = self.resolver().render_raw(scope, e);

        let parts: Vec<&str> = raw.split('.').collect();
        if parts.len() < 2 {
            return if self.metadata.has_metadata() {
                format!("(no-event-for:{})", raw)
            } else {
                UNKNOWN_TYPE.to_string()
            };
        }
        // Paths may carry a leading system component.
        let (event, field) = if parts.len() >= 3
            && self.metadata.has_metadata()
            && self.metadata.system_of(parts[0]).is_none()
        {
            (parts[1], parts[2])
        } else {
            (parts[0], parts[1])
        };

        if field == COMMON_TIMESTAMP {
            return "u64".to_string();
        }
        if !self.metadata.has_metadata() {
            return UNKNOWN_TYPE.to_string();
        }
        match self.metadata.field_type(event, field) {
            Some(ty) => ty.to_string(),
            None => {
                if self.metadata.system_of(event).is_none() {
                    format!("(no-event-for:{})", raw)
                } else {
                    format!("(no-field-{}-for-{})", field, raw)
                }
            }
        }
    }

    /// `<system><delim><event>`; a path that already carries a system
    /// component is split, anything else is looked up in the metadata with
    /// the `(system)` marker as fallback.
    fn system_event(&self, text: &str, delim: char) -> String {
        if let Some((system, event)) = text.split_once('.') {
            return format!("{}{}{}", system, delim, event);
        }
        let system = self.metadata.system_of(text).unwrap_or(UNKNOWN_SYSTEM);
        format!("{}{}{}", system, delim, text)
    }

    fn fresh_arg(&mut self) -> String {
        let name = format!("__arg{}__", self.arg_count);
        self.arg_count += 1;
        name
    }
}

/// Event name component of a resolved from/to label (prefix before the
/// first dot, or the whole label).
fn event_prefix(label: &str) -> &str {
    label.split('.').next().unwrap_or(label)
}

/// `:` before the first value, `,` before every later one.
fn push_value_delim(content: &mut String, first: &mut bool) {
    if *first {
        content.push(':');
        *first = false;
    } else {
        content.push(',');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_match_is_prefix_exact() {
        assert_eq!(
            event_match("sched_switch", "sched_switch.pid"),
            Some("pid")
        );
        assert_eq!(event_match("sched_switch", "sched_switch2.pid"), None);
        assert_eq!(event_match("sched_waking", "sched_waking2.pid"), None);
        assert_eq!(event_match("sched_switch", "sched_switch"), None);
        assert_eq!(
            event_match("sched_switch", "sched_switch.common_timestamp.usecs"),
            Some("common_timestamp.usecs")
        );
    }

    #[test]
    fn test_event_prefix() {
        assert_eq!(event_prefix("sched_waking"), "sched_waking");
        assert_eq!(event_prefix("sched.sched_waking"), "sched");
    }

    #[test]
    fn test_value_delimiters() {
        let mut s = String::from("hist:keys=pid");
        let mut first = true;
        push_value_delim(&mut s, &mut first);
        s.push_str("a=x");
        push_value_delim(&mut s, &mut first);
        s.push_str("b=y");
        assert_eq!(s, "hist:keys=pid:a=x,b=y");
    }
}
