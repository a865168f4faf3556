//! Tracing subscriber setup for the command-line driver.
//!
//! All log output goes to stderr so stdout stays reserved for command output.
//!
//! ## Environment Variables
//!
//! * `PHASEWRIGHT_LOG` - filter directives (e.g. `phasewright=debug`)
//! * `RUST_LOG` - fallback when `PHASEWRIGHT_LOG` is unset
//! * `PHASEWRIGHT_LOG_FORMAT` - `json` or `text`, used when no format is passed in

use anyhow::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("Unknown log format '{}'. Valid formats: text, json", other),
        }
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(format: Option<LogFormat>, verbose: bool) -> Result<()> {
    INIT.call_once(|| {
        let filter = create_env_filter(verbose);
        let format = format
            .or_else(|| {
                std::env::var("PHASEWRIGHT_LOG_FORMAT")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or_default();

        let result = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(
                    tracing_fmt::layer()
                        .json()
                        .with_target(true)
                        .with_writer(io::stderr),
                )
                .with(filter)
                .try_init(),
            LogFormat::Text => tracing_subscriber::registry()
                .with(
                    tracing_fmt::layer()
                        .with_target(false)
                        .with_writer(io::stderr),
                )
                .with(filter)
                .try_init(),
        };

        // Embedders may already have installed their own subscriber
        if result.is_ok() {
            tracing::debug!("Logging initialized with format: {}", format);
        }
    });

    Ok(())
}

pub fn is_initialized() -> bool {
    INIT.is_completed()
}

fn create_env_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "debug" } else { "warn" };
    if let Ok(spec) = std::env::var("PHASEWRIGHT_LOG") {
        EnvFilter::try_new(&spec).unwrap_or_else(|_| EnvFilter::new(default))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    }
}
