//! Phase execution command: `phasewright run`.

use anyhow::{Context, Result};
use console::style;

use super::session::Session;
use phasewright::config::Settings;
use phasewright::orchestrator::Target;

pub fn cmd_run(settings: &Settings, phase: Option<&str>) -> Result<()> {
    let target = Target::from(phase);
    let mut session = Session::open(settings)?;

    if let Target::Query(query) = target {
        let answer = session.orchestrator.introspect(query);
        println!(
            "{}",
            serde_json::to_string_pretty(&answer).context("Failed to serialize query result")?
        );
        return Ok(());
    }

    let before = session.orchestrator.cursor();
    let result = session.orchestrator.run(target);
    // Progress is saved whether or not the run got all the way through
    session.save()?;

    if let Err(e) = &result
        && let Some(failure) = e.handler_failure()
    {
        eprintln!();
        eprintln!(
            "{} phase '{}' (index {}) at handler {} ({})",
            style("Failed").red().bold(),
            failure.phase,
            failure.phase_index,
            failure.handler_index,
            failure.handler
        );
        if let Some(rollback) = &failure.rollback_error {
            eprintln!("{} {}", style("Rollback incomplete:").yellow(), rollback);
        }
        eprintln!();
    }
    result.context("Run failed")?;

    let orchestrator = &session.orchestrator;
    let after = orchestrator.cursor();
    println!();
    if after == before {
        println!("Nothing to run; target phase already committed.");
    } else {
        let last = after.index().unwrap_or_default();
        for index in before.next()..=last {
            let name = orchestrator.registry().name(index).unwrap_or_default();
            println!("  {} {}", style("✓").green(), name);
        }
    }
    println!();
    match orchestrator.current_phase() {
        Some(name) => println!("Cursor: {} ({})", after, name),
        None => println!("Cursor: {}", after),
    }
    if orchestrator.is_complete() {
        println!("{}", style("All phases complete.").green());
    }
    println!();

    Ok(())
}
