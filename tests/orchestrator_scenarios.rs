//! End-to-end behaviour of the orchestrator library.
//!
//! Covers ordering, resume, atomic failure and merge semantics through the
//! public API only.

use anyhow::{anyhow, bail};
use phasewright::{
    Cursor, EffectCoordinator, HandlerOutput, Introspection, MemoryLogger, Orchestrator,
    PhaseRegistry, Registration, Severity, State,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Effect coordinator that counts rollbacks per scope.
#[derive(Default)]
struct CountingEffects {
    rollbacks: Mutex<Vec<String>>,
}

impl CountingEffects {
    fn rollbacks(&self) -> Vec<String> {
        self.rollbacks.lock().unwrap().clone()
    }
}

impl EffectCoordinator for CountingEffects {
    fn begin_scope(&self, _scope: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn commit_scope(&self, _scope: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn rollback_scope(&self, scope: &str) -> anyhow::Result<()> {
        self.rollbacks.lock().unwrap().push(scope.to_string());
        Ok(())
    }
}

fn registry() -> PhaseRegistry {
    PhaseRegistry::new(["boot", "execute", "persist"]).unwrap()
}

/// boot writes x = 1, execute writes y = 2 * x.
fn register_boot_and_execute(orch: &mut Orchestrator) {
    assert!(orch.register(
        "boot",
        Registration::inline(|_, _| Ok(HandlerOutput::merge([("x", 1)])))
    ));
    assert!(orch.register(
        "execute",
        Registration::inline(|_, ctx| {
            let x = ctx
                .get_as::<i64>("x")
                .ok_or_else(|| anyhow!("x missing"))?;
            Ok(HandlerOutput::merge([("y", x * 2)]))
        })
    ));
}

fn expected_xy() -> State {
    [("x", 1), ("y", 2)].into_iter().collect()
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn test_total_order_across_and_within_phases() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let mut orch = Orchestrator::new(registry());

    // Register out of phase order on purpose
    for (phase, label) in [
        ("persist", "persist-a"),
        ("boot", "boot-a"),
        ("execute", "execute-a"),
        ("boot", "boot-b"),
        ("persist", "persist-b"),
    ] {
        let trace = Arc::clone(&trace);
        orch.register(
            phase,
            Registration::named(label, move |_, _| {
                trace.lock().unwrap().push(label);
                Ok(HandlerOutput::Unchanged)
            }),
        );
    }

    orch.run_all().unwrap();
    assert_eq!(
        *trace.lock().unwrap(),
        vec!["boot-a", "boot-b", "execute-a", "persist-a", "persist-b"]
    );
}

#[test]
fn test_handlers_receive_their_phase_name() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut orch = Orchestrator::new(registry());
    for phase in ["boot", "execute", "persist"] {
        let seen = Arc::clone(&seen);
        orch.register(
            phase,
            Registration::inline(move |name, ctx| {
                seen.lock().unwrap().push((name.to_string(), ctx.phase().to_string()));
                Ok(HandlerOutput::Unchanged)
            }),
        );
    }

    orch.run_all().unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    for (name, ctx_phase) in seen.iter() {
        assert_eq!(name, ctx_phase);
    }
    assert_eq!(seen[2].0, "persist");
}

// =============================================================================
// Resume
// =============================================================================

#[test]
fn test_idempotent_resume_invokes_nothing() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut orch = Orchestrator::new(registry());
    for phase in ["boot", "execute", "persist"] {
        let calls = Arc::clone(&calls);
        orch.register(
            phase,
            Registration::inline(move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(HandlerOutput::merge([("n", 1)]))
            }),
        );
    }

    orch.run_to("execute").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let state = orch.state().clone();
    let version = orch.version();

    for target in ["boot", "execute", "0", "1"] {
        let output = orch.run(target).unwrap();
        assert_eq!(output.state(), Some(&state));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(orch.version(), version);
    assert_eq!(orch.cursor(), Cursor::at(1));
}

#[test]
fn test_run_to_stops_at_target() {
    let mut orch = Orchestrator::new(registry());
    register_boot_and_execute(&mut orch);

    let state = orch.run_to("boot").unwrap();
    assert_eq!(state.get("x"), Some(&json!(1)));
    assert!(!state.contains_key("y"));
    assert_eq!(orch.cursor(), Cursor::at(0));
    assert!(!orch.is_complete());
}

// =============================================================================
// Failure
// =============================================================================

#[test]
fn test_atomic_failure_keeps_state_and_cursor() {
    let mut orch = Orchestrator::new(registry());
    register_boot_and_execute(&mut orch);
    orch.register(
        "persist",
        Registration::inline(|_, ctx| {
            ctx.set("x", 100);
            ctx.set("scratch", "partial");
            Ok(HandlerOutput::merge([("z", 3)]))
        }),
    );
    orch.register("persist", Registration::inline(|_, _| bail!("write failed")));

    orch.run_to("execute").unwrap();
    let before = orch.state().clone();
    let cursor = orch.cursor();

    assert!(orch.run_all().is_err());
    assert_eq!(orch.state(), &before);
    assert_eq!(orch.cursor(), cursor);
    assert_eq!(orch.ledger().len(), 2);
}

#[test]
fn test_one_rollback_per_failed_phase() {
    let effects = Arc::new(CountingEffects::default());
    let second_ran = Arc::new(AtomicUsize::new(0));
    let mut orch = Orchestrator::builder(registry())
        .effects(effects.clone())
        .build();

    orch.register("execute", Registration::inline(|_, _| bail!("first failure")));
    let counter = Arc::clone(&second_ran);
    orch.register(
        "execute",
        Registration::inline(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            bail!("second failure")
        }),
    );

    let err = orch.run_all().unwrap_err();
    assert!(err.to_string().contains("first failure"));
    assert_eq!(effects.rollbacks(), vec!["execute".to_string()]);
    // Execution stops at the first failing handler
    assert_eq!(second_ran.load(Ordering::SeqCst), 0);

    // Each further attempt rolls back once more
    assert!(orch.run_all().is_err());
    assert_eq!(effects.rollbacks().len(), 2);
}

#[test]
fn test_successful_phases_never_roll_back() {
    let effects = Arc::new(CountingEffects::default());
    let mut orch = Orchestrator::builder(registry())
        .effects(effects.clone())
        .build();
    register_boot_and_execute(&mut orch);

    orch.run_all().unwrap();
    assert!(effects.rollbacks().is_empty());
}

// =============================================================================
// Merge semantics
// =============================================================================

#[test]
fn test_last_writer_wins_within_phase() {
    let mut orch = Orchestrator::new(PhaseRegistry::new(["boot"]).unwrap());
    orch.register("boot", Registration::inline(|_, _| Ok(HandlerOutput::merge([("a", 1)]))));
    orch.register("boot", Registration::inline(|_, _| Ok(HandlerOutput::Unchanged)));
    orch.register(
        "boot",
        Registration::inline(|_, _| Ok(HandlerOutput::merge([("a", 2), ("b", 3)]))),
    );

    let state = orch.run_all().unwrap();
    assert_eq!(state, [("a", 2), ("b", 3)].into_iter().collect::<State>());
}

#[test]
fn test_later_handler_sees_earlier_merge() {
    let mut orch = Orchestrator::new(PhaseRegistry::new(["boot"]).unwrap());
    orch.register("boot", Registration::inline(|_, _| Ok(HandlerOutput::merge([("a", 1)]))));
    orch.register(
        "boot",
        Registration::inline(|_, ctx| {
            let a = ctx.get_as::<i64>("a").unwrap_or(0);
            Ok(HandlerOutput::merge([("a_seen", a)]))
        }),
    );

    let state = orch.run_all().unwrap();
    assert_eq!(state.get("a_seen"), Some(&json!(1)));
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_scenario_three_phases() {
    let mut orch = Orchestrator::new(registry());
    register_boot_and_execute(&mut orch);

    let state = orch.run_all().unwrap();
    assert_eq!(state, expected_xy());
    assert_eq!(orch.cursor(), Cursor::at(2));
    assert_eq!(orch.current_phase(), Some("persist"));

    let again = orch.run("execute").unwrap();
    assert_eq!(again.into_state(), Some(expected_xy()));
    assert_eq!(orch.version(), 3);
}

#[test]
fn test_scenario_failing_persist() {
    let effects = Arc::new(CountingEffects::default());
    let logger = Arc::new(MemoryLogger::new());
    let mut orch = Orchestrator::builder(registry())
        .effects(effects.clone())
        .logger(logger.clone())
        .build();
    register_boot_and_execute(&mut orch);
    orch.register("persist", Registration::inline(|_, _| bail!("always throws")));

    let err = orch.run(None::<&str>).unwrap_err();
    let failure = err.handler_failure().unwrap();
    assert_eq!(failure.phase, "persist");
    assert_eq!(failure.phase_index, 2);
    assert_eq!(failure.handler_index, 0);

    assert_eq!(orch.state(), &expected_xy());
    assert_eq!(orch.cursor(), Cursor::at(1));
    assert_eq!(effects.rollbacks(), vec!["persist".to_string()]);

    let records = logger.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].severity, Severity::Error);
    assert_eq!(records[0].context.phase, "persist");
}

#[test]
fn test_queries_through_run() {
    let mut orch = Orchestrator::new(registry());
    register_boot_and_execute(&mut orch);
    orch.run_to("execute").unwrap();

    assert_eq!(
        orch.run("name").unwrap().introspection(),
        Some(&Introspection::Name(Some("execute".into())))
    );
    assert_eq!(
        orch.run("index").unwrap().introspection(),
        Some(&Introspection::Cursor(Some(1)))
    );
    match orch.run("dump").unwrap().introspection() {
        Some(Introspection::Dump(dump)) => {
            assert_eq!(dump.state, expected_xy());
            assert_eq!(dump.backups.len(), 2);
        }
        other => panic!("expected dump, got {:?}", other),
    }
    // Queries leave progress alone
    assert_eq!(orch.cursor(), Cursor::at(1));
}
