//! Progress commands: `phasewright status`, `inspect`, `rewind`, `reset`.

use anyhow::{Context, Result};
use console::style;

use super::session::Session;
use phasewright::config::{CONFIG_FILE, Settings};
use phasewright::phase::PhaseRef;

pub fn cmd_status(settings: &Settings) -> Result<()> {
    let session = Session::open(settings)?;
    let orchestrator = &session.orchestrator;
    let registry = orchestrator.registry();
    let cursor = orchestrator.cursor();

    println!();
    println!("Phasewright Status");
    println!("==================");
    println!();

    match &settings.config_path {
        Some(path) => println!("Config:     {}", path.display()),
        None => println!("Config:     defaults (no {})", CONFIG_FILE),
    }
    if session.checkpoint.exists() {
        println!("Checkpoint: {}", session.checkpoint.path().display());
    } else {
        println!("Checkpoint: none");
    }
    println!();

    println!("Phases:");
    for phase in registry.phases() {
        // Script references only; journal bracketing handlers are inline
        let scripts = registry
            .handlers(phase.index)
            .iter()
            .filter(|r| r.is_reference())
            .count();
        let marker = if cursor.has_committed(phase.index) {
            style("✓").green()
        } else if phase.index == cursor.next() {
            style("→").yellow()
        } else {
            style("·").dim()
        };
        let suffix = if scripts == 1 { "" } else { "s" };
        println!(
            "  {} {:>2}. {} {}",
            marker,
            phase.index,
            phase.name,
            style(format!("({} script{})", scripts, suffix)).dim()
        );
    }
    println!();

    match orchestrator.current_phase() {
        Some(name) => println!("Last committed: {} (cursor {})", name, cursor),
        None => println!("Last committed: none"),
    }
    println!("State version:  {}", orchestrator.version());
    let keys: Vec<&str> = orchestrator.state().keys().collect();
    if keys.is_empty() {
        println!("State keys:     (empty)");
    } else {
        println!("State keys:     {}", keys.join(", "));
    }
    println!();

    if orchestrator.is_complete() {
        println!("All phases complete.");
    } else {
        println!("Run 'phasewright run' to continue.");
    }
    println!();

    Ok(())
}

pub fn cmd_inspect(settings: &Settings, query: &str) -> Result<()> {
    let session = Session::open(settings)?;
    let answer = session.orchestrator.query(query)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&answer).context("Failed to serialize query result")?
    );
    Ok(())
}

pub fn cmd_rewind(settings: &Settings, phase: &str) -> Result<()> {
    let mut session = Session::open(settings)?;
    session
        .orchestrator
        .rewind_to(PhaseRef::from(phase))
        .with_context(|| format!("Cannot rewind to '{}'", phase))?;
    session.save()?;

    let cursor = session.orchestrator.cursor();
    match session.orchestrator.current_phase() {
        Some(name) => println!("Rewound. Cursor: {} ({})", cursor, name),
        None => println!("Rewound. No phases committed."),
    }
    Ok(())
}

/// Progress lives only in the checkpoint, so a reset deletes it without
/// loading it. This also recovers a checkpoint that no longer matches the
/// configured phases.
pub fn cmd_reset(settings: &Settings, force: bool) -> Result<()> {
    use dialoguer::Confirm;

    if !force {
        let confirm = Confirm::new()
            .with_prompt("This will reset all progress. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    settings.checkpoint_file().remove()?;

    println!("Reset complete");
    Ok(())
}
