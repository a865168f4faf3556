use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use phasewright::config::{CliOverrides, Settings};
use phasewright::logging::{self, LogFormat};

mod cmd;

#[derive(Parser)]
#[command(name = "phasewright")]
#[command(version, about = "Run an application lifecycle as ordered, resumable phases")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to the config file. Defaults to phasewright.toml in the project directory
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Checkpoint file. Overrides phasewright.toml and PHASEWRIGHT_CHECKPOINT
    #[arg(long, global = true)]
    pub checkpoint: Option<PathBuf>,

    /// Directory holding handler scripts
    #[arg(long, global = true)]
    pub handlers_dir: Option<PathBuf>,

    /// Seconds a handler script may run before it is killed
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run remaining phases, up to and including --phase when given
    Run {
        /// Phase name, position, or an introspection token
        #[arg(short, long)]
        phase: Option<String>,
    },
    /// Show phase progress
    Status,
    /// Answer an introspection query (order, cursor, index, name, dump) as JSON
    Inspect { query: String },
    /// Undo committed phases from PHASE onward so they run again
    Rewind { phase: String },
    /// Forget all progress
    Reset {
        #[arg(long)]
        force: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default phasewright.toml file
    Init,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // `config init` has to work before a config file exists
    if let Commands::Config {
        command: Some(ConfigCommands::Init),
    } = &cli.command
    {
        logging::init(cli.log_format, cli.verbose)?;
        return cmd::cmd_config_init(&project_dir, cli.config.as_deref());
    }

    let overrides = CliOverrides {
        checkpoint: cli.checkpoint.clone(),
        handlers_dir: cli.handlers_dir.clone(),
        timeout_secs: cli.timeout_secs,
        log_format: cli.log_format,
    };
    let settings = Settings::resolve(&project_dir, cli.config.as_deref(), overrides)?;
    logging::init(Some(settings.log_format), cli.verbose)?;

    match &cli.command {
        Commands::Run { phase } => cmd::cmd_run(&settings, phase.as_deref())?,
        Commands::Status => cmd::cmd_status(&settings)?,
        Commands::Inspect { query } => cmd::cmd_inspect(&settings, query)?,
        Commands::Rewind { phase } => cmd::cmd_rewind(&settings, phase)?,
        Commands::Reset { force } => cmd::cmd_reset(&settings, *force)?,
        Commands::Config { command } => cmd::cmd_config(&settings, command.clone())?,
    }

    Ok(())
}
