//! File-resident handlers executed as child processes.
//!
//! A script handler is an executable under the loader's base directory:
//! - the working copy is passed as JSON via stdin: `{"phase", "index", "state"}`
//! - `PHASEWRIGHT_PHASE` and `PHASEWRIGHT_PHASE_INDEX` are set in its environment
//! - exit 0 with empty stdout (or `null`) leaves the state unchanged
//! - exit 0 with a JSON object on stdout merges that object into the state
//! - anything else fails the phase, carrying stderr in the error
//!
//! Scripts run on a private current-thread tokio runtime so a timeout can be
//! enforced while the orchestrator itself stays synchronous. Do not call a
//! script handler from inside another tokio runtime.

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{Handler, HandlerLoader, HandlerOutput};
use crate::context::ExecutionContext;
use crate::effects::FsEffectJournal;

/// Default time a script may run before it is killed.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Resolves references to executables under `base_dir`.
pub struct ScriptLoader {
    base_dir: PathBuf,
    working_dir: Option<PathBuf>,
    timeout: Duration,
    /// reference -> phase name -> files
    tracked: HashMap<String, HashMap<String, Vec<PathBuf>>>,
    effects: Option<Arc<FsEffectJournal>>,
}

impl ScriptLoader {
    pub fn new(base_dir: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            working_dir: None,
            timeout,
            tracked: HashMap::new(),
            effects: None,
        }
    }

    /// Directory scripts are spawned in (defaults to `base_dir`).
    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Declare files the script behind `reference` mutates when it runs in
    /// `phase`. Runs in other phases back up nothing.
    pub fn with_tracked(
        mut self,
        phase: impl Into<String>,
        reference: impl Into<String>,
        paths: Vec<PathBuf>,
    ) -> Self {
        self.tracked
            .entry(reference.into())
            .or_default()
            .entry(phase.into())
            .or_default()
            .extend(paths);
        self
    }

    /// Back up tracked files in `journal` before each script run.
    pub fn with_effects(mut self, journal: Arc<FsEffectJournal>) -> Self {
        self.effects = Some(journal);
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn script_path(&self, reference: &str) -> PathBuf {
        self.base_dir.join(reference)
    }
}

impl HandlerLoader for ScriptLoader {
    fn exists(&self, reference: &str) -> bool {
        !reference.trim().is_empty() && self.script_path(reference).is_file()
    }

    fn load(&self, reference: &str) -> Result<Arc<dyn Handler>> {
        let path = self.script_path(reference);
        let path = std::fs::canonicalize(&path)
            .with_context(|| format!("Failed to resolve handler script: {}", path.display()))?;
        if !path.is_file() {
            bail!("Handler script is not a file: {}", path.display());
        }
        let working_dir = self
            .working_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.clone());

        debug!(reference, path = %path.display(), "Loaded handler script");

        Ok(Arc::new(ScriptHandler {
            reference: reference.to_string(),
            path,
            working_dir,
            timeout: self.timeout,
            tracked: self.tracked.get(reference).cloned().unwrap_or_default(),
            effects: self.effects.clone(),
        }))
    }
}

/// A loaded script, bound to its resolved path.
pub struct ScriptHandler {
    reference: String,
    path: PathBuf,
    working_dir: PathBuf,
    timeout: Duration,
    tracked: HashMap<String, Vec<PathBuf>>,
    effects: Option<Arc<FsEffectJournal>>,
}

impl ScriptHandler {
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn execute(&self, phase: &str, index: usize, payload: &[u8]) -> Result<Output> {
        let mut child = Command::new(&self.path)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("PHASEWRIGHT_PHASE", phase)
            .env("PHASEWRIGHT_PHASE_INDEX", index.to_string())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn handler script: {}", self.path.display()))?;

        // Scripts that ignore stdin may close it before we finish writing
        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(payload).await
            && e.kind() != ErrorKind::BrokenPipe
        {
            return Err(e).context("Failed to write state to handler stdin");
        }

        child
            .wait_with_output()
            .await
            .context("Failed to wait for handler script")
    }

    fn parse_output(&self, output: &Output) -> Result<HandlerOutput> {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            if stderr.trim().is_empty() {
                bail!(
                    "Handler script '{}' failed with exit code {}",
                    self.reference,
                    exit_code
                );
            }
            bail!(
                "Handler script '{}' failed (exit {}): {}",
                self.reference,
                exit_code,
                stderr.trim()
            );
        }

        if !stderr.trim().is_empty() {
            debug!(script = %self.reference, stderr = %stderr.trim(), "Handler script stderr");
        }

        let body = stdout.trim();
        if body.is_empty() {
            return Ok(HandlerOutput::Unchanged);
        }
        let value: Value = serde_json::from_str(body).with_context(|| {
            format!("Handler script '{}' printed invalid JSON", self.reference)
        })?;
        match value {
            Value::Null => Ok(HandlerOutput::Unchanged),
            Value::Object(map) => Ok(HandlerOutput::Merge(map.into_iter().collect())),
            other => Err(anyhow!(
                "Handler script '{}' must print a JSON object, got: {}",
                self.reference,
                other
            )),
        }
    }
}

impl Handler for ScriptHandler {
    fn call(&self, phase: &str, ctx: &mut ExecutionContext<'_>) -> Result<HandlerOutput> {
        if let Some(journal) = &self.effects
            && let Some(paths) = self.tracked.get(phase)
        {
            for path in paths {
                journal.track(phase, path)?;
            }
        }

        let payload = serde_json::to_vec(&json!({
            "phase": phase,
            "index": ctx.index(),
            "state": ctx.state(),
        }))
        .context("Failed to serialize handler input to JSON")?;

        debug!(
            script = %self.reference,
            phase,
            timeout_secs = self.timeout.as_secs(),
            "Executing handler script"
        );

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start script runtime")?;
        let output = runtime
            .block_on(async { timeout(self.timeout, self.execute(phase, ctx.index(), &payload)).await })
            .map_err(|_| {
                anyhow!(
                    "Handler script '{}' timed out after {} seconds",
                    self.reference,
                    self.timeout.as_secs()
                )
            })??;

        debug!(
            script = %self.reference,
            exit_code = output.status.code().unwrap_or(-1),
            "Handler script completed"
        );

        self.parse_output(&output)
    }

    fn label(&self) -> String {
        self.reference.clone()
    }
}
