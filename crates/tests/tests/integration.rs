//! Integration tests for end-to-end weave execution.
//!
//! These tests verify the full pipeline:
//! Deserialize program → Load → Run cycles → Verify store and gateway

use weave_runtime::error::Error;
use weave_runtime::{AttrRef, Program, ScriptedGateway, SensorId, load};
use weave_tests::TestHarness;

const PRINT: &str = r#"{
    "fields": [{ "name": "agent", "attributes": { "value": 1.0 } }],
    "sensors": ["test"],
    "actions": [{ "name": "print", "arity": 2 }],
    "tension": [{
        "sensor": "test", "comparator": "<", "operand": { "model": "agent.value" },
        "action": { "name": "print", "args": [1.0, 0.0] }
    }],
    "loop": { "iterations": 1 }
}"#;

const PAIR: &str = r#"{
    "config": { "drift": { "rate": 1.0, "max_step": 0.2 } },
    "fields": [{ "name": "pair", "attributes": { "target_distance": 1.0 } }],
    "sensors": ["distance"],
    "actions": [{ "name": "approach", "arity": 1 }],
    "tension": [{
        "sensor": "distance", "comparator": ">", "operand": { "model": "pair.target_distance" },
        "action": { "name": "approach", "args": [{ "sense": "distance" }] }
    }],
    "drift": [{ "target": "pair.target_distance", "min": 0.0, "max": 5.0 }],
    "constraints": [{
        "expr": { "tension": [{ "sense": "distance" }, { "model": "pair.target_distance" }] },
        "comparator": "<", "threshold": 1.5
    }],
    "resolve": [{
        "name": "close_gap",
        "expr": { "tension": [{ "sense": "distance" }, { "model": "pair.target_distance" }] }
    }],
    "loop": { "iterations": 1 }
}"#;

const SWARM_LABS: &str = include_str!("../../../demos/swarm_labs/program.json");
const SWARM_FRAMES: &str = include_str!("../../../demos/swarm_labs/sensors.json");

fn load_error(source: &str) -> weave_runtime::LoadError {
    match load(Program::from_json(source).unwrap()) {
        Err(Error::Load(e)) => e,
        Err(other) => panic!("expected load error, got {other}"),
        Ok(_) => panic!("expected load error, program loaded"),
    }
}

/// One field, one rule, one cycle: exactly one actuation.
#[test]
fn test_single_rule_single_cycle() {
    let mut harness = TestHarness::with_sensors(PRINT, &[("test", 0.5)]);
    let report = harness.cycle().clone();

    assert_eq!(report.tension.triggered.len(), 1);
    assert!((report.tension.magnitude - 0.5).abs() < 1e-12);
    assert_eq!(harness.invocations().len(), 1);
    assert_eq!(harness.invocations()[0].action.to_string(), "print");
    assert_eq!(harness.invocations()[0].args, vec![1.0, 0.0]);
}

#[test]
fn test_quiet_rule_does_not_actuate() {
    let mut harness = TestHarness::with_sensors(PRINT, &[("test", 1.5)]);
    harness.run_cycles(3);
    assert!(harness.invocations().is_empty());
    assert!(harness.reports().iter().all(|r| r.tension.magnitude == 0.0));
}

/// Drift proposes 1.2, the constraint holds, Resolve commits.
#[test]
fn test_drift_constrain_resolve_commit() {
    let mut harness = TestHarness::with_sensors(PAIR, &[("distance", 1.3)]);
    let report = harness.cycle().clone();

    assert_eq!(report.candidates, 1);
    assert_eq!(report.violations, 0);
    assert_eq!(report.commits.len(), 1);
    assert_eq!(report.commits[0].objective, "close_gap");
    let committed = harness.get_scalar("pair.target_distance").unwrap();
    assert!((committed - 1.2).abs() < 1e-12);
    assert_eq!(harness.publications().len(), 1);
}

#[test]
fn test_worsening_candidate_is_retained() {
    // Tension is rising, so drift steps down and away from the sensed distance
    let frames = r#"[{ "distance": 1.1 }, { "distance": 1.5 }]"#;
    let mut harness = TestHarness::with_frames(PAIR, frames);
    harness.cycle();
    let after_first = harness.get_scalar("pair.target_distance").unwrap();
    let report = harness.cycle().clone();

    assert_eq!(report.candidates, 1);
    assert!(report.commits.is_empty());
    assert_eq!(report.retained, 1);
    assert_eq!(harness.get_scalar("pair.target_distance"), Some(after_first));
}

#[test]
fn test_repeated_cycles_converge_on_sensed_value() {
    let mut harness = TestHarness::with_sensors(PAIR, &[("distance", 2.0)]);
    harness.run_cycles(10);
    let converged = harness.get_scalar("pair.target_distance").unwrap();
    assert!((converged - 2.0).abs() < 1e-9);
}

/// Every commit satisfies the constraints of its own cycle.
#[test]
fn test_no_commit_violates_constraint() {
    let source = PAIR.replace(r#""threshold": 1.5"#, r#""threshold": 0.25"#);
    let frames = r#"[
        { "distance": 1.3 }, { "distance": 1.5 }, { "distance": 1.1 },
        { "distance": 2.0 }, { "distance": 1.2 }
    ]"#;
    let distances = [1.3, 1.5, 1.1, 2.0, 1.2];
    let mut harness = TestHarness::with_frames(&source, frames);
    harness.run_cycles(5);

    let reports = harness.reports();
    assert!(reports.iter().any(|r| !r.commits.is_empty()));
    assert!(reports.iter().any(|r| !r.rejected.is_empty()));
    for (report, distance) in reports.iter().zip(distances) {
        for commit in &report.commits {
            assert!(
                (distance - commit.value).abs() < 0.25,
                "cycle {} committed {} against distance {}",
                report.cycle,
                commit.value,
                distance
            );
        }
    }
}

const COUPLED: &str = r#"{
    "config": { "drift": { "rate": 1.0, "max_step": 0.2 } },
    "fields": [{ "name": "f", "attributes": { "a": 1.0, "b": 1.0 } }],
    "sensors": ["s"],
    "actions": [{ "name": "nudge", "arity": 0 }],
    "tension": [
        { "name": "gap_a", "sensor": "s", "comparator": ">", "operand": { "model": "f.a" },
          "action": { "name": "nudge", "args": [] } },
        { "name": "gap_b", "sensor": "s", "comparator": ">", "operand": { "model": "f.b" },
          "action": { "name": "nudge", "args": [] } }
    ],
    "drift": [
        { "target": "f.a", "min": 0.0, "max": 5.0 },
        { "target": "f.b", "min": 0.0, "max": 5.0 }
    ],
    "constraints": [{
        "name": "in_step",
        "expr": { "tension": [{ "model": "f.a" }, { "model": "f.b" }] },
        "comparator": "<", "threshold": 0.05
    }],
    "resolve": [{
        "name": "track_a",
        "expr": { "tension": [{ "sense": "s" }, { "model": "f.a" }] }
    }],
    "loop": { "iterations": 1 }
}"#;

/// Both attributes drift together and pass Constrain jointly, but only
/// `f.a` improves an objective. Committing it alone would pull the two
/// apart, so the commit is vetoed.
#[test]
fn test_partial_commit_respects_coupling_constraint() {
    let mut harness = TestHarness::with_sensors(COUPLED, &[("s", 2.0)]);
    let report = harness.cycle().clone();

    assert_eq!(report.candidates, 2);
    assert!(report.commits.is_empty());
    assert_eq!(
        report.rejected,
        vec![(AttrRef::new("f", "a"), "in_step".to_string())]
    );
    assert_eq!(report.unresolved, 1);
    let a = harness.get_scalar("f.a").unwrap();
    let b = harness.get_scalar("f.b").unwrap();
    assert!((a - b).abs() < 0.05);
    assert!(harness.publications().is_empty());
}

#[test]
fn test_action_arity_holds_for_every_invocation() {
    let source = r#"{
        "fields": [{ "name": "arm", "attributes": { "reach": 0.5, "grip": 0.2 } }],
        "sensors": ["distance", "force"],
        "actions": [
            { "name": "extend", "arity": 2 },
            { "name": "release", "arity": 0 },
            { "name": "squeeze", "arity": 1 }
        ],
        "tension": [
            { "sensor": "distance", "comparator": ">", "operand": { "model": "arm.reach" },
              "action": { "name": "extend", "args": [{ "sense": "distance" }, { "model": "arm.reach" }] } },
            { "sensor": "force", "comparator": ">", "operand": 1.0,
              "action": { "name": "release", "args": [] } },
            { "sensor": "force", "comparator": "<", "operand": { "model": "arm.grip" },
              "action": { "name": "squeeze", "args": [{ "tension": [{ "sense": "force" }, 0.2] }] } }
        ],
        "loop": { "iterations": 4 }
    }"#;
    let frames = r#"[
        { "distance": 0.9, "force": 1.4 },
        { "distance": 0.4, "force": 0.1 },
        { "distance": 0.7, "force": 0.05 }
    ]"#;
    let mut harness = TestHarness::with_frames(source, frames);
    harness.run_cycles(4);

    let arity = |name: &str| match name {
        "extend" => 2,
        "release" => 0,
        "squeeze" => 1,
        other => panic!("unexpected action {other}"),
    };
    assert!(!harness.invocations().is_empty());
    for invocation in harness.invocations() {
        assert_eq!(invocation.args.len(), arity(&invocation.action.to_string()));
    }
}

#[test]
fn test_actuator_error_does_not_stop_cycle() {
    let source = r#"{
        "fields": [{ "name": "agent", "attributes": { "value": 1.0 } }],
        "sensors": ["test"],
        "actions": [{ "name": "halt", "arity": 0 }, { "name": "print", "arity": 1 }],
        "tension": [
            { "sensor": "test", "comparator": "<", "operand": { "model": "agent.value" },
              "action": { "name": "halt", "args": [] } },
            { "sensor": "test", "comparator": "<", "operand": { "model": "agent.value" },
              "action": { "name": "print", "args": [{ "sense": "test" }] } }
        ],
        "loop": { "iterations": 2 }
    }"#;
    let gateway = ScriptedGateway::constant([("test", 0.5)]).fail_action("halt");
    let mut harness = TestHarness::with_gateway(source, gateway);
    harness.run_cycles(2);

    assert!(harness.reports().iter().all(|r| r.tension.actuator_errors == 1));
    assert_eq!(harness.invocations().len(), 2);
    assert!(harness.invocations().iter().all(|i| i.args == vec![0.5]));
}

#[test]
fn test_history_is_bounded_fifo() {
    let source = PAIR.replace(r#""config": {"#, r#""config": { "history_capacity": 4,"#);
    let frames = r#"[
        { "distance": 1.3 }, { "distance": 1.6 }, { "distance": 1.9 },
        { "distance": 2.2 }, { "distance": 2.5 }, { "distance": 2.8 }
    ]"#;
    let mut harness = TestHarness::with_frames(&source, frames);
    harness.run_cycles(6);

    let runtime = harness.runtime();
    let history = runtime
        .history(&AttrRef::new("pair", "target_distance"))
        .unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history.capacity(), 4);

    let global = runtime.global_history().to_vec();
    let expected: Vec<f64> = harness.reports()[2..]
        .iter()
        .map(|r| r.tension.magnitude)
        .collect();
    assert_eq!(global, expected);
}

const GATED: &str = r#"{
    "fields": [{ "name": "expert", "attributes": { "coherence": 0.0 } }],
    "sensors": ["load", "gravity"],
    "actions": [{ "name": "log", "arity": 0 }],
    "tension": [{
        "sensor": "load", "comparator": ">", "operand": { "model": "expert.coherence" },
        "action": { "name": "log", "args": [] }
    }],
    "metaweave": {
        "primitives": [{ "name": "gravity_sense", "sensor": "gravity", "threshold": 0.0 }],
        "extend": [{ "field": "expert", "attribute": "gravity", "initial": 9.81,
                     "guard": { "sensor": "gravity_sense" } }]
    },
    "loop": { "iterations": 1, "metaweave": { "comparator": ">", "threshold": 2.0 } }
}"#;

#[test]
fn test_metaweave_runs_only_above_gate() {
    let mut below = TestHarness::with_sensors(GATED, &[("load", 1.9), ("gravity", 9.8)]);
    assert!(!below.cycle().metaweave_ran);
    assert_eq!(below.get("expert.gravity"), None);

    let mut above = TestHarness::with_sensors(GATED, &[("load", 2.5), ("gravity", 9.8)]);
    assert!(above.cycle().metaweave_ran);
    assert_eq!(above.get_scalar("expert.gravity"), Some(9.81));
}

#[test]
fn test_extend_is_idempotent_across_cycles() {
    let mut harness = TestHarness::with_sensors(GATED, &[("load", 2.5), ("gravity", 9.8)]);
    harness.run_cycles(5);

    assert_eq!(harness.schema_version("expert"), Some(1));
    let extensions: usize = harness.reports().iter().map(|r| r.extensions.len()).sum();
    assert_eq!(extensions, 1);
    assert_eq!(harness.get_scalar("expert.gravity"), Some(9.81));
}

#[test]
fn test_discovery_is_monotonic() {
    // Gravity disappears after the first cycle and tension drops below the gate
    let frames = r#"[
        { "load": 2.5, "gravity": 9.8 },
        { "load": 0.5 },
        { "load": 3.0 },
        { "load": 0.1, "gravity": 9.7 }
    ]"#;
    let mut harness = TestHarness::with_frames(GATED, frames);
    let gravity_sense = SensorId::from("gravity_sense");

    let mut seen = 0;
    for _ in 0..4 {
        harness.cycle();
        let discovered = harness.discovered();
        assert!(discovered.len() >= seen);
        assert!(discovered.contains(&gravity_sense));
        seen = discovered.len();
    }
    assert_eq!(harness.discovered(), vec![gravity_sense]);
}

#[test]
fn test_stop_handle_ends_run() {
    let mut harness = TestHarness::with_sensors(PRINT, &[("test", 0.5)]);
    let stop = harness.runtime().stop_handle();
    harness.runtime_mut().run(2).unwrap();
    stop.stop();
    let report = harness.runtime_mut().run(10).unwrap();

    assert!(report.stopped);
    assert_eq!(harness.current_cycle(), 2);
    assert_eq!(harness.invocations().len(), 2);
}

/// The swarm-labs demo: coherence drifts toward the sensed value, a safety
/// spike vetoes one cycle, and gravity is learned once.
#[test]
fn test_swarm_labs_demo() {
    let mut harness = TestHarness::with_frames(SWARM_LABS, SWARM_FRAMES);
    harness.run_cycles(10);

    let reports = harness.reports();
    let commits: usize = reports.iter().map(|r| r.commits.len()).sum();
    assert_eq!(commits, 9);
    assert!(reports[3].commits.is_empty());
    assert_eq!(reports[3].rejected.len(), 1);
    assert_eq!(reports[3].rejected[0].1, "safety");

    let design_calls = harness
        .invocations()
        .iter()
        .filter(|i| i.action.to_string() == "design_experiment")
        .count();
    assert_eq!(design_calls, 10);
    assert!(harness.invocations().iter().all(|i| i.args.len() == 2));

    let target = harness.get_scalar("generalist.coherence_target").unwrap();
    assert!(target > 0.7 && target < 0.8, "target {target}");

    assert_eq!(harness.discovered(), vec![SensorId::from("gravity_sensor")]);
    assert_eq!(harness.get_scalar("quantum_expert.gravity"), Some(9.81));
    assert_eq!(harness.schema_version("quantum_expert"), Some(1));
    assert_eq!(harness.schema_version("generalist"), Some(0));
    assert_eq!(harness.publications().len(), 10);
}

#[test]
fn test_load_rejects_unknown_attribute() {
    let err = load_error(&PRINT.replace("agent.value", "agent.speed"));
    assert_eq!(err.declaration, "tension[0]");
}

#[test]
fn test_load_rejects_unknown_action() {
    let err = load_error(&PRINT.replace(r#""name": "print", "args""#, r#""name": "beep", "args""#));
    assert!(err.reason.contains("unknown action"));
}

#[test]
fn test_load_rejects_arity_mismatch() {
    let err = load_error(&PRINT.replace("[1.0, 0.0]", "[1.0]"));
    assert!(err.reason.contains("takes 2 arguments"));
}

#[test]
fn test_load_rejects_empty_drift_domain() {
    let err = load_error(&PAIR.replace(r#""min": 0.0, "max": 5.0"#, r#""min": 5.0, "max": 0.0"#));
    assert_eq!(err.declaration, "drift pair.target_distance");
}

#[test]
fn test_load_rejects_duplicate_primitive() {
    let source = GATED.replace(
        r#""primitives": [{ "name": "gravity_sense", "sensor": "gravity", "threshold": 0.0 }]"#,
        r#""primitives": [
            { "name": "gravity_sense", "sensor": "gravity", "threshold": 0.0 },
            { "name": "gravity_sense", "sensor": "load", "threshold": 1.0 }
        ]"#,
    );
    let err = load_error(&source);
    assert_eq!(err.declaration, "metaweave primitive gravity_sense");
}

#[test]
fn test_load_rejects_zero_history_capacity() {
    load_error(&PAIR.replace(r#""config": {"#, r#""config": { "history_capacity": 0,"#));
}

#[test]
fn test_empty_program_runs() {
    let mut harness = TestHarness::from_source(r#"{ "loop": { "iterations": 3 } }"#);
    harness.run_cycles(3);
    assert_eq!(harness.current_cycle(), 3);
    assert!(harness.invocations().is_empty());
}

#[test]
fn test_huge_history_capacity_runs() {
    let source = PAIR.replace(
        r#""config": {"#,
        r#""config": { "history_capacity": 18446744073709551615,"#,
    );
    let mut harness = TestHarness::with_sensors(&source, &[("distance", 1.3)]);
    harness.run_cycles(2);
    assert_eq!(harness.current_cycle(), 2);
}
