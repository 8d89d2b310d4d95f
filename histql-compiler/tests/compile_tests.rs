//! Compiler integration tests: full query text in, trigger program out.

use std::sync::Arc;

use histql_compiler::{Compiler, TriggerRole};
use histql_schema::{EventDef, EventRegistry, FieldDef};

fn sched_event(name: &str, fields: &[(&str, &str)]) -> EventDef {
    EventDef {
        name: name.to_string(),
        system: "sched".to_string(),
        fields: fields
            .iter()
            .map(|(name, type_name)| FieldDef {
                name: name.to_string(),
                type_name: type_name.to_string(),
            })
            .collect(),
    }
}

fn create_test_compiler() -> Compiler {
    let mut registry = EventRegistry::new();
    registry.register_event(sched_event(
        "sched_waking",
        &[("pid", "pid_t"), ("prio", "int"), ("target_cpu", "int")],
    ));
    registry.register_event(sched_event(
        "sched_switch",
        &[
            ("prev_pid", "pid_t"),
            ("next_pid", "pid_t"),
            ("next_prio", "int"),
        ],
    ));
    Compiler::new(Arc::new(registry))
}

#[test]
fn test_plain_select_round_trip() {
    let compiler = Compiler::with_stub();
    let result = compiler
        .compile("select evA.pid as keypid, evA.ts as v1 from evA")
        .unwrap();

    assert!(!result.is_join());
    assert_eq!(result.triggers.len(), 1);
    let trigger = result.single_trigger().unwrap();
    // Event-local fields are emitted bare, the event prefix stripped.
    assert_eq!(trigger.content, "hist:keys=pid:values=ts");
    assert_eq!(trigger.path, "events/(system)/evA/trigger");
}

#[test]
fn test_plain_select_with_filter() {
    let compiler = Compiler::with_stub();
    let result = compiler
        .compile("select evA.pid as keypid from evA where evA.pid == 128")
        .unwrap();

    assert_eq!(
        result.single_trigger().unwrap().content,
        "hist:keys=pid if pid == 128"
    );
}

#[test]
fn test_wakeup_latency_join() {
    let compiler = create_test_compiler();
    let result = compiler
        .compile(
            "(select end.next_pid as pid, end.next_prio as prio, \
              end.common_timestamp.usecs - start.common_timestamp.usecs as delta \
             from sched_waking as start \
             join sched_switch as end \
             on start.pid = end.next_pid) as wakeup_lat",
        )
        .unwrap();

    assert!(result.is_join());

    let synthetic = result.synthetic_event().unwrap();
    assert_eq!(synthetic.name, "wakeup_lat");
    assert_eq!(
        synthetic.definition,
        "wakeup_lat pid_t pid int prio u64 delta"
    );

    let start = result.start_trigger().unwrap();
    assert_eq!(
        start.content,
        "hist:keys=pid:__arg0__=common_timestamp.usecs"
    );
    assert_eq!(start.path, "events/sched/sched_waking/trigger");

    let end = result.end_trigger().unwrap();
    assert_eq!(
        end.content,
        "hist:keys=next_pid:delta=common_timestamp.usecs-$__arg0__\
         :onmatch(sched.sched_waking).trace(wakeup_lat,next_pid,next_prio,$delta)"
    );
    assert_eq!(end.path, "events/sched/sched_switch/trigger");
}

#[test]
fn test_named_variable_is_declared_once_and_reused() {
    let compiler = Compiler::with_stub();
    let result = compiler
        .compile(
            "(select start.common_timestamp as t0, \
              end.common_timestamp - start.common_timestamp as delta \
             from evA as start join evB as end on start.pid = end.pid) as lat",
        )
        .unwrap();

    let start = result.start_trigger().unwrap();
    assert_eq!(start.content, "hist:keys=pid:t0=common_timestamp");
    assert_eq!(start.content.matches("t0=").count(), 1);

    let end = result.end_trigger().unwrap();
    // The composite reuses the declared variable instead of capturing a
    // second copy of the same path.
    assert!(end.content.contains("delta=common_timestamp-$t0"));
    assert!(!end.content.contains("__arg"));
    assert!(end.content.ends_with(".trace(lat,$t0,$delta)"));
}

#[test]
fn test_filter_lands_on_its_own_side() {
    let compiler = Compiler::with_stub();
    let result = compiler
        .compile(
            "(select end.ts as t1 from evA as start join evB as end \
             on start.pid = end.pid where start.prio < 100) as q",
        )
        .unwrap();

    let start = result.start_trigger().unwrap();
    assert!(start.content.ends_with(" if prio < 100"));
    let end = result.end_trigger().unwrap();
    assert!(!end.content.contains(" if "));
}

#[test]
fn test_trace_lists_to_side_fields_bare() {
    let compiler = Compiler::with_stub();
    let result = compiler
        .compile(
            "(select end.ts as t1 from evA as start join evB as end \
             on start.pid = end.pid) as q",
        )
        .unwrap();

    let end = result.end_trigger().unwrap();
    // The synthetic field is named t1, but trace passes the source field.
    assert!(end.content.ends_with(".trace(q,ts)"));
    assert!(result.synthetic_event().unwrap().definition.ends_with(" t1"));
}

#[test]
fn test_key_prefixed_selection_is_key_and_declared_variable() {
    let compiler = Compiler::with_stub();
    let result = compiler
        .compile(
            "(select start.cpu as keycpu, end.ts as t1 \
             from evA as start join evB as end on start.pid = end.pid) as q",
        )
        .unwrap();

    // The key selection groups the start trigger and is declared as a
    // variable there, so the trace reference to it resolves.
    let start = result.start_trigger().unwrap();
    assert_eq!(start.content, "hist:keys=pid,cpu:keycpu=cpu");

    let end = result.end_trigger().unwrap();
    assert!(end.content.ends_with(".trace(q,$keycpu,ts)"));
    assert!(!end.content.contains("keycpu="));
}

#[test]
fn test_alias_spelled_like_its_own_field_compiles() {
    let compiler = Compiler::with_stub();
    // The alias chain bottoms out instead of recursing; the field is
    // emitted under its own name.
    let result = compiler.compile("select ts as ts from evA").unwrap();
    assert_eq!(result.single_trigger().unwrap().content, "hist:keys=:values=ts");
}

#[test]
fn test_stub_metadata_degrades_to_markers() {
    let compiler = Compiler::with_stub();
    let result = compiler
        .compile(
            "(select end.ts as t1 from evA as start join evB as end \
             on start.pid = end.pid) as q",
        )
        .unwrap();

    assert_eq!(result.start_trigger().unwrap().path, "events/(system)/evA/trigger");
    assert!(result.end_trigger().unwrap().content.contains("onmatch((system).evA)"));
    assert_eq!(result.synthetic_event().unwrap().definition, "q (unknown) t1");
}

#[test]
fn test_shell_script_installs_synthetic_event_first() {
    let compiler = create_test_compiler();
    let result = compiler
        .compile(
            "(select end.next_pid as pid from sched_waking as start \
             join sched_switch as end on start.pid = end.next_pid) as wakeup",
        )
        .unwrap();

    let script = result.to_shell_script();
    let lines: Vec<&str> = script.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("echo 'wakeup "));
    assert!(lines[0].ends_with("> synthetic_events"));
    assert!(lines[1].ends_with("> events/sched/sched_waking/trigger"));
    assert!(lines[2].ends_with("> events/sched/sched_switch/trigger"));
}

#[test]
fn test_from_subquery_is_emitted_before_outer_table() {
    let compiler = Compiler::with_stub();
    let result = compiler
        .compile(
            "select inner_ev.val from \
             (select evA.x as val from evA) as inner_ev",
        )
        .unwrap();

    // The nested table becomes its own trigger, emitted first.
    assert_eq!(result.triggers.len(), 2);
    assert_eq!(result.triggers[0].role, TriggerRole::Single);
    assert_eq!(result.triggers[0].path, "events/(system)/evA/trigger");
}

#[test]
fn test_usecs_sugar_expands_to_common_timestamp() {
    let compiler = Compiler::with_stub();
    let result = compiler
        .compile(
            "(select end.USECS - start.USECS as delta \
             from evA as start join evB as end on start.pid = end.pid) as q",
        )
        .unwrap();

    let start = result.start_trigger().unwrap();
    assert!(start.content.contains("__arg0__=common_timestamp.usecs"));
    // Timestamp arithmetic always types as u64, even without metadata.
    assert_eq!(result.synthetic_event().unwrap().definition, "q u64 delta");
}
