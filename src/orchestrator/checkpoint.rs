//! Persisting orchestrator progress across processes.
//!
//! The core keeps its bookkeeping in memory. A `Checkpoint` captures the
//! cursor, state and snapshot ledger so a later process can pick up where an
//! earlier one stopped; `CheckpointFile` stores it as JSON on disk.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{Cursor, Orchestrator};
use crate::errors::InvariantError;
use crate::ledger::SnapshotLedger;
use crate::state::State;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Phase order the checkpoint was taken under
    pub phases: Vec<String>,
    pub cursor: Option<usize>,
    pub version: u64,
    pub state: State,
    pub ledger: SnapshotLedger,
    pub saved_at: DateTime<Utc>,
}

impl Orchestrator {
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            phases: self.registry.names(),
            cursor: self.cursor.index(),
            version: self.store.version(),
            state: self.store.working_copy(),
            ledger: self.ledger.clone(),
            saved_at: Utc::now(),
        }
    }

    /// Replace progress with `checkpoint`. Registered handlers are kept.
    pub fn restore(&mut self, checkpoint: Checkpoint) -> Result<(), InvariantError> {
        let expected = self.registry.names();
        if checkpoint.phases != expected {
            return Err(InvariantError::CheckpointMismatch {
                expected,
                found: checkpoint.phases,
            });
        }
        if let Some(cursor) = checkpoint.cursor
            && cursor >= expected.len()
        {
            return Err(InvariantError::InvalidPhases(format!(
                "checkpoint cursor {} is past the last phase",
                cursor
            )));
        }

        validate_ledger(&checkpoint, &expected)?;

        self.store.restore(checkpoint.state, checkpoint.version);
        self.ledger = checkpoint.ledger;
        self.cursor = Cursor::from(checkpoint.cursor);
        debug!(cursor = %self.cursor, version = self.store.version(), "Restored checkpoint");
        Ok(())
    }
}

/// The ledger must hold exactly one snapshot per committed phase, stored
/// under that phase's index and naming that phase.
fn validate_ledger(checkpoint: &Checkpoint, phases: &[String]) -> Result<(), InvariantError> {
    let committed = checkpoint.cursor.map_or(0, |cursor| cursor + 1);
    for (key, snapshot) in checkpoint.ledger.entries() {
        if key >= committed {
            return Err(InvariantError::CorruptCheckpoint(format!(
                "snapshot for phase {} is past cursor {}",
                key,
                Cursor::from(checkpoint.cursor)
            )));
        }
        if snapshot.index != key {
            return Err(InvariantError::CorruptCheckpoint(format!(
                "snapshot stored under {} claims index {}",
                key, snapshot.index
            )));
        }
        if snapshot.phase != phases[key] {
            return Err(InvariantError::CorruptCheckpoint(format!(
                "snapshot {} names phase '{}', expected '{}'",
                key, snapshot.phase, phases[key]
            )));
        }
    }
    // Every key is below `committed`, so a short ledger means a gap
    if checkpoint.ledger.len() != committed {
        return Err(InvariantError::CorruptCheckpoint(format!(
            "{} snapshots for {} committed phases",
            checkpoint.ledger.len(),
            committed
        )));
    }
    Ok(())
}

/// JSON checkpoint on disk.
///
/// Saves go through a sibling temp file and a rename, serialized by an
/// exclusive lock on a sibling `.lock` file.
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("tmp")
    }

    /// Load the checkpoint, or `None` if none has been saved.
    pub fn load(&self) -> Result<Option<Checkpoint>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read checkpoint: {}", self.path.display()))?;
        let checkpoint: Checkpoint = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse checkpoint: {}", self.path.display()))?;
        Ok(Some(checkpoint))
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create checkpoint directory: {}", parent.display())
            })?;
        }

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())
            .context("Failed to open checkpoint lock file")?;
        FileExt::lock_exclusive(&lock).context("Failed to lock checkpoint")?;

        let json =
            serde_json::to_string_pretty(checkpoint).context("Failed to serialize checkpoint")?;
        let temp = self.temp_path();
        let result = (|| -> Result<()> {
            let mut file = fs::File::create(&temp)
                .with_context(|| format!("Failed to create {}", temp.display()))?;
            file.write_all(json.as_bytes())
                .context("Failed to write checkpoint")?;
            file.sync_all().context("Failed to sync checkpoint")?;
            fs::rename(&temp, &self.path)
                .with_context(|| format!("Failed to move checkpoint into {}", self.path.display()))
        })();

        FileExt::unlock(&lock).context("Failed to unlock checkpoint")?;
        result?;

        debug!(path = %self.path.display(), cursor = ?checkpoint.cursor, "Saved checkpoint");
        Ok(())
    }

    /// Delete the checkpoint and its lock file.
    pub fn remove(&self) -> Result<()> {
        for path in [self.path.clone(), self.lock_path()] {
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }
}
