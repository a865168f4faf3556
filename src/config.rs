//! Project configuration for the command-line driver.
//!
//! Settings are read from `phasewright.toml` in the project directory and
//! layered: file → environment → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [orchestrator]
//! phases = ["boot", "execute", "persist"]
//! checkpoint = ".phasewright/checkpoint.json"
//! handlers_dir = "handlers"
//! timeout_secs = 30
//! log_format = "text"
//!
//! [seed]
//! app = "demo"
//!
//! [[handlers]]
//! phase = "boot"
//! script = "boot.sh"
//! tracks = ["out/boot.txt"]
//! description = "Write the boot marker"
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::InvariantError;
use crate::handler::script::DEFAULT_TIMEOUT_SECS;
use crate::logging::LogFormat;
use crate::orchestrator::CheckpointFile;
use crate::phase::{DEFAULT_LIFECYCLE, PhaseRef, PhaseRegistry};
use crate::state::State;

/// Name of the project configuration file.
pub const CONFIG_FILE: &str = "phasewright.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSection {
    /// Phase order; the default lifecycle when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phases: Option<Vec<String>>,
    /// Checkpoint file, relative to the project directory
    #[serde(default = "default_checkpoint")]
    pub checkpoint: PathBuf,
    /// Directory holding handler scripts, relative to the project directory
    #[serde(default = "default_handlers_dir")]
    pub handlers_dir: PathBuf,
    /// Per-script timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,
}

fn default_checkpoint() -> PathBuf {
    PathBuf::from(".phasewright/checkpoint.json")
}

fn default_handlers_dir() -> PathBuf {
    PathBuf::from("handlers")
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_enabled() -> bool {
    true
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            phases: None,
            checkpoint: default_checkpoint(),
            handlers_dir: default_handlers_dir(),
            timeout_secs: default_timeout_secs(),
            log_format: None,
        }
    }
}

/// A script handler declared in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Phase name or position
    pub phase: PhaseRef,
    /// Script path, relative to `handlers_dir`
    pub script: String,
    /// Files the script mutates, relative to the project directory
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tracks: Vec<PathBuf>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The complete phasewright.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectToml {
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    /// Initial state
    #[serde(default, skip_serializing_if = "State::is_empty")]
    pub seed: State,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handlers: Vec<HandlerConfig>,
}

impl ProjectToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse phasewright.toml")
    }

    /// Load `phasewright.toml` from `project_dir`, or defaults when absent.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize phasewright.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Phase names in order.
    pub fn phase_names(&self) -> Vec<String> {
        self.orchestrator
            .phases
            .clone()
            .unwrap_or_else(|| DEFAULT_LIFECYCLE.iter().map(|s| s.to_string()).collect())
    }

    pub fn registry(&self) -> Result<PhaseRegistry, InvariantError> {
        PhaseRegistry::new(self.phase_names())
    }

    /// Handlers that are switched on, in file order.
    pub fn enabled_handlers(&self) -> impl Iterator<Item = &HandlerConfig> {
        self.handlers.iter().filter(|h| h.enabled)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let registry = match self.registry() {
            Ok(registry) => Some(registry),
            Err(e) => {
                warnings.push(e.to_string());
                None
            }
        };

        if self.orchestrator.timeout_secs == 0 {
            warnings.push("timeout_secs is 0: every script will time out immediately".to_string());
        }

        for (i, handler) in self.handlers.iter().enumerate() {
            if handler.script.trim().is_empty() {
                warnings.push(format!("Handler {} has an empty script path", i));
            }
            if let Some(registry) = &registry
                && registry.resolve(&handler.phase).is_none()
            {
                warnings.push(format!(
                    "Handler {} ({}) targets unknown phase '{}'",
                    i, handler.script, handler.phase
                ));
            }
            if handler.tracks.iter().any(|p| p.is_absolute()) {
                warnings.push(format!(
                    "Handler {} ({}) tracks an absolute path; tracked files should live in the project",
                    i, handler.script
                ));
            }
        }

        warnings
    }
}

/// Values given on the command line, overriding file and environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub checkpoint: Option<PathBuf>,
    pub handlers_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub log_format: Option<LogFormat>,
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub project_dir: PathBuf,
    /// Config file in use, if one exists
    pub config_path: Option<PathBuf>,
    pub toml: ProjectToml,
    pub checkpoint: PathBuf,
    pub handlers_dir: PathBuf,
    pub timeout: Duration,
    pub log_format: LogFormat,
}

impl Settings {
    /// Resolve settings from the file, the process environment and `overrides`.
    pub fn resolve(
        project_dir: &Path,
        config_path: Option<&Path>,
        overrides: CliOverrides,
    ) -> Result<Self> {
        Self::resolve_with_env(project_dir, config_path, overrides, |key| {
            std::env::var(key).ok()
        })
    }

    /// Like `resolve`, reading environment variables through `env`.
    pub fn resolve_with_env(
        project_dir: &Path,
        config_path: Option<&Path>,
        overrides: CliOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;

        let (toml, config_path) = match config_path {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                (ProjectToml::load(path)?, Some(path.to_path_buf()))
            }
            None => {
                let default_path = project_dir.join(CONFIG_FILE);
                if default_path.exists() {
                    (ProjectToml::load(&default_path)?, Some(default_path))
                } else {
                    (ProjectToml::default(), None)
                }
            }
        };

        let checkpoint = overrides
            .checkpoint
            .or_else(|| env("PHASEWRIGHT_CHECKPOINT").map(PathBuf::from))
            .unwrap_or_else(|| toml.orchestrator.checkpoint.clone());
        let handlers_dir = overrides
            .handlers_dir
            .or_else(|| env("PHASEWRIGHT_HANDLERS_DIR").map(PathBuf::from))
            .unwrap_or_else(|| toml.orchestrator.handlers_dir.clone());

        let env_timeout = match env("PHASEWRIGHT_TIMEOUT_SECS") {
            Some(raw) => Some(raw.trim().parse::<u64>().with_context(|| {
                format!("Invalid PHASEWRIGHT_TIMEOUT_SECS value '{}'", raw)
            })?),
            None => None,
        };
        let timeout_secs = overrides
            .timeout_secs
            .or(env_timeout)
            .unwrap_or(toml.orchestrator.timeout_secs);

        let env_format = match env("PHASEWRIGHT_LOG_FORMAT") {
            Some(raw) => Some(raw.parse::<LogFormat>()?),
            None => None,
        };
        let log_format = overrides
            .log_format
            .or(env_format)
            .or(toml.orchestrator.log_format)
            .unwrap_or_default();

        Ok(Self {
            checkpoint: absolutize(&project_dir, checkpoint),
            handlers_dir: absolutize(&project_dir, handlers_dir),
            timeout: Duration::from_secs(timeout_secs),
            log_format,
            project_dir,
            config_path,
            toml,
        })
    }

    pub fn checkpoint_file(&self) -> CheckpointFile {
        CheckpointFile::new(&self.checkpoint)
    }

    /// Path of a tracked file declared in the config.
    pub fn project_path(&self, path: &Path) -> PathBuf {
        absolutize(&self.project_dir, path.to_path_buf())
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        if !self.toml.handlers.is_empty() && !self.handlers_dir.is_dir() {
            warnings.push(format!(
                "Handlers directory does not exist: {}",
                self.handlers_dir.display()
            ));
        }
        warnings
    }
}

fn absolutize(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    // =========================================
    // ProjectToml tests
    // =========================================

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = ProjectToml::parse("").unwrap();
        assert_eq!(config, ProjectToml::default());
        assert_eq!(config.phase_names().len(), 8);
        assert_eq!(config.orchestrator.timeout_secs, 30);
        assert_eq!(config.orchestrator.handlers_dir, PathBuf::from("handlers"));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let config = ProjectToml::parse(
            r#"
[orchestrator]
phases = ["boot", "execute", "persist"]
checkpoint = "state/cp.json"
handlers_dir = "scripts"
timeout_secs = 5
log_format = "json"

[seed]
app = "demo"
retries = 3

[[handlers]]
phase = "boot"
script = "boot.sh"
tracks = ["out/boot.txt"]
description = "Write boot marker"

[[handlers]]
phase = 2
script = "persist.sh"
enabled = false
"#,
        )
        .unwrap();

        assert_eq!(config.phase_names(), vec!["boot", "execute", "persist"]);
        assert_eq!(config.orchestrator.checkpoint, PathBuf::from("state/cp.json"));
        assert_eq!(config.orchestrator.log_format, Some(LogFormat::Json));
        assert_eq!(config.seed.get("app"), Some(&json!("demo")));
        assert_eq!(config.seed.get("retries"), Some(&json!(3)));
        assert_eq!(config.handlers.len(), 2);
        assert_eq!(config.handlers[0].phase, PhaseRef::Name("boot".into()));
        assert_eq!(config.handlers[1].phase, PhaseRef::Position(2));
        assert!(config.handlers[0].enabled);
        assert_eq!(config.enabled_handlers().count(), 1);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(ProjectToml::parse("[orchestrator\nphases = ").is_err());
    }

    #[test]
    fn test_validate_reports_problems() {
        let config = ProjectToml::parse(
            r#"
[orchestrator]
phases = ["boot", "execute"]
timeout_secs = 0

[[handlers]]
phase = "teardown"
script = ""
"#,
        )
        .unwrap();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().any(|w| w.contains("timeout_secs")));
        assert!(warnings.iter().any(|w| w.contains("empty script")));
        assert!(warnings.iter().any(|w| w.contains("teardown")));
    }

    #[test]
    fn test_validate_reports_bad_phase_list() {
        let config = ProjectToml::parse("[orchestrator]\nphases = [\"boot\", \"boot\"]\n").unwrap();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("duplicate"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut config = ProjectToml::default();
        config.orchestrator.phases = Some(vec!["boot".into(), "persist".into()]);
        config.seed.insert("app", "demo");
        config.handlers.push(HandlerConfig {
            phase: PhaseRef::Name("boot".into()),
            script: "boot.sh".into(),
            tracks: vec![PathBuf::from("out/boot.txt")],
            enabled: true,
            description: None,
        });
        config.save(&path).unwrap();

        let loaded = ProjectToml::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let config = ProjectToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config, ProjectToml::default());
    }

    // =========================================
    // Settings tests
    // =========================================

    #[test]
    fn test_settings_defaults_are_project_relative() {
        let dir = tempdir().unwrap();
        let settings =
            Settings::resolve_with_env(dir.path(), None, CliOverrides::default(), no_env).unwrap();
        let root = dir.path().canonicalize().unwrap();

        assert!(settings.config_path.is_none());
        assert_eq!(settings.checkpoint, root.join(".phasewright/checkpoint.json"));
        assert_eq!(settings.handlers_dir, root.join("handlers"));
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert_eq!(settings.log_format, LogFormat::Text);
    }

    #[test]
    fn test_settings_layering_file_env_cli() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[orchestrator]\ntimeout_secs = 5\nhandlers_dir = \"from-file\"\ncheckpoint = \"file.json\"\n",
        )
        .unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("PHASEWRIGHT_TIMEOUT_SECS", "10"),
            ("PHASEWRIGHT_HANDLERS_DIR", "from-env"),
            ("PHASEWRIGHT_LOG_FORMAT", "json"),
        ]);
        let overrides = CliOverrides {
            timeout_secs: Some(20),
            ..Default::default()
        };

        let settings = Settings::resolve_with_env(dir.path(), None, overrides, |k| {
            env.get(k).map(|v| v.to_string())
        })
        .unwrap();
        let root = dir.path().canonicalize().unwrap();

        assert!(settings.config_path.is_some());
        // CLI beats env beats file
        assert_eq!(settings.timeout, Duration::from_secs(20));
        assert_eq!(settings.handlers_dir, root.join("from-env"));
        assert_eq!(settings.checkpoint, root.join("file.json"));
        assert_eq!(settings.log_format, LogFormat::Json);
    }

    #[test]
    fn test_settings_invalid_env_timeout() {
        let dir = tempdir().unwrap();
        let result = Settings::resolve_with_env(dir.path(), None, CliOverrides::default(), |k| {
            (k == "PHASEWRIGHT_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_settings_explicit_config_must_exist() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("other.toml");
        let result =
            Settings::resolve_with_env(dir.path(), Some(&missing), CliOverrides::default(), no_env);
        assert!(result.is_err());
    }

    #[test]
    fn test_settings_missing_handlers_dir_warns() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[[handlers]]\nphase = \"boot\"\nscript = \"boot.sh\"\n",
        )
        .unwrap();
        let settings =
            Settings::resolve_with_env(dir.path(), None, CliOverrides::default(), no_env).unwrap();
        let warnings = settings.validate();
        assert!(warnings.iter().any(|w| w.contains("Handlers directory")));
    }
}
