//! Configuration view and validation commands: `phasewright config`.

use anyhow::{Context, Result};
use std::path::Path;

use super::super::ConfigCommands;
use phasewright::config::{CONFIG_FILE, ProjectToml, Settings};
use phasewright::phase::DEFAULT_LIFECYCLE;

pub fn cmd_config(settings: &Settings, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => show(settings),
        Some(ConfigCommands::Validate) => validate(settings),
        Some(ConfigCommands::Init) => cmd_config_init(&settings.project_dir, None),
    }
}

fn show(settings: &Settings) -> Result<()> {
    let toml = &settings.toml;

    println!();
    println!("Phasewright Configuration");
    println!("=========================");
    println!();

    match &settings.config_path {
        Some(path) => println!("Config file: {}", path.display()),
        None => {
            println!(
                "No {} found in {}",
                CONFIG_FILE,
                settings.project_dir.display()
            );
            println!("Using default configuration.");
        }
    }
    println!();

    println!("[orchestrator]");
    println!("  phases = {:?}", toml.phase_names());
    println!(
        "  checkpoint = \"{}\"",
        toml.orchestrator.checkpoint.display()
    );
    println!(
        "  handlers_dir = \"{}\"",
        toml.orchestrator.handlers_dir.display()
    );
    println!("  timeout_secs = {}", toml.orchestrator.timeout_secs);
    if let Some(format) = toml.orchestrator.log_format {
        println!("  log_format = \"{}\"", format);
    }
    println!();

    if !toml.seed.is_empty() {
        println!("[seed]");
        for (key, value) in &toml.seed {
            println!("  {} = {}", key, value);
        }
        println!();
    }

    for handler in &toml.handlers {
        println!("[[handlers]]");
        println!("  phase = \"{}\"", handler.phase);
        println!("  script = \"{}\"", handler.script);
        if !handler.tracks.is_empty() {
            let tracks: Vec<String> = handler
                .tracks
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            println!("  tracks = {:?}", tracks);
        }
        if !handler.enabled {
            println!("  enabled = false");
        }
        if let Some(description) = &handler.description {
            println!("  description = \"{}\"", description);
        }
        println!();
    }

    // Show effective values (including env overrides)
    println!("Effective values (with env/CLI overrides):");
    println!("  checkpoint = \"{}\"", settings.checkpoint.display());
    println!("  handlers_dir = \"{}\"", settings.handlers_dir.display());
    println!("  timeout_secs = {}", settings.timeout.as_secs());
    println!("  log_format = \"{}\"", settings.log_format);
    println!();

    if settings.config_path.is_none() {
        println!("Run 'phasewright config init' to create a {} file.", CONFIG_FILE);
        println!();
    }

    Ok(())
}

fn validate(settings: &Settings) -> Result<()> {
    println!();
    println!("Validating configuration...");
    println!();

    if settings.config_path.is_none() {
        println!("No {} found. Using defaults (valid).", CONFIG_FILE);
        return Ok(());
    }

    let warnings = settings.validate();
    if warnings.is_empty() {
        println!("Configuration is valid.");
    } else {
        println!("Configuration warnings:");
        for warning in warnings {
            println!("  - {}", warning);
        }
    }
    println!();

    Ok(())
}

/// Write a default config file and an empty handlers directory.
pub fn cmd_config_init(project_dir: &Path, config_path: Option<&Path>) -> Result<()> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| project_dir.join(CONFIG_FILE));

    if config_path.exists() {
        println!("{} already exists at {}", CONFIG_FILE, config_path.display());
        println!("Delete it first if you want to recreate it.");
        return Ok(());
    }

    if let Some(parent) = config_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut toml = ProjectToml::default();
    toml.orchestrator.phases = Some(DEFAULT_LIFECYCLE.iter().map(|s| s.to_string()).collect());
    toml.save(&config_path)?;

    let handlers_dir = project_dir.join(&toml.orchestrator.handlers_dir);
    std::fs::create_dir_all(&handlers_dir)
        .with_context(|| format!("Failed to create {}", handlers_dir.display()))?;

    println!("Created {} at {}", CONFIG_FILE, config_path.display());
    println!();
    println!("You can now customize:");
    println!("  - [orchestrator] phases, checkpoint, handlers_dir, timeout_secs");
    println!("  - [seed] initial state values");
    println!("  - [[handlers]] phase, script, tracks");
    println!();

    Ok(())
}
