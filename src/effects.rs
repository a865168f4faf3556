//! Filesystem effect coordination.
//!
//! Handlers that touch the filesystem are expected to route every mutation
//! through an `EffectCoordinator` scoped to their phase. When a phase fails,
//! the orchestrator calls `rollback_scope` for that phase exactly once; it
//! never opens or commits scopes itself.
//!
//! `FsEffectJournal` is the file-backed implementation: before a file is
//! first touched in a scope its prior contents (or absence) are recorded, and
//! rolling the scope back puts every tracked file back the way it was.

use anyhow::{Context, Result, anyhow};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub trait EffectCoordinator: Send + Sync {
    fn begin_scope(&self, scope: &str) -> Result<()>;
    fn commit_scope(&self, scope: &str) -> Result<()>;
    fn rollback_scope(&self, scope: &str) -> Result<()>;
}

/// Coordinator for handlers with no filesystem side effects.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEffects;

impl EffectCoordinator for NoopEffects {
    fn begin_scope(&self, _scope: &str) -> Result<()> {
        Ok(())
    }

    fn commit_scope(&self, _scope: &str) -> Result<()> {
        Ok(())
    }

    fn rollback_scope(&self, _scope: &str) -> Result<()> {
        Ok(())
    }
}

/// Prior state of one file, captured the first time a scope touches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBackup {
    pub path: PathBuf,
    /// `None` when the file did not exist
    pub original: Option<Vec<u8>>,
}

impl FileBackup {
    fn capture(path: &Path) -> Result<Self> {
        let original = match std::fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to back up file: {}", path.display()));
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            original,
        })
    }

    fn restore(&self) -> Result<()> {
        match &self.original {
            Some(bytes) => {
                if let Some(parent) = self.path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to recreate directory: {}", parent.display())
                    })?;
                }
                std::fs::write(&self.path, bytes)
                    .with_context(|| format!("Failed to restore file: {}", self.path.display()))
            }
            None => match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e).with_context(|| {
                    format!("Failed to remove created file: {}", self.path.display())
                }),
            },
        }
    }
}

/// Per-scope journal of file backups.
#[derive(Debug, Default)]
pub struct FsEffectJournal {
    scopes: Mutex<HashMap<String, Vec<FileBackup>>>,
}

impl FsEffectJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn scopes(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<FileBackup>>>> {
        self.scopes
            .lock()
            .map_err(|_| anyhow!("Effect journal lock poisoned"))
    }

    /// Record the current contents of `path` under `scope`.
    ///
    /// Only the first call per path and scope captures anything, so the
    /// backup always reflects the file before the scope touched it.
    pub fn track(&self, scope: &str, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut scopes = self.scopes()?;
        let backups = scopes.entry(scope.to_string()).or_default();
        if backups.iter().any(|b| b.path == path) {
            return Ok(());
        }
        backups.push(FileBackup::capture(path)?);
        Ok(())
    }

    /// Track `path`, then write `contents` to it.
    pub fn write(&self, scope: &str, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
        let path = path.as_ref();
        self.track(scope, path)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write file: {}", path.display()))
    }

    /// Track `path`, then delete it if present.
    pub fn remove(&self, scope: &str, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.track(scope, path)?;
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove file: {}", path.display())),
        }
    }

    /// Paths tracked under `scope`, in the order they were first touched.
    pub fn tracked(&self, scope: &str) -> Vec<PathBuf> {
        self.scopes
            .lock()
            .map(|s| {
                s.get(scope)
                    .map(|b| b.iter().map(|b| b.path.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Number of scopes that are open.
    pub fn open_scopes(&self) -> usize {
        self.scopes.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl EffectCoordinator for FsEffectJournal {
    fn begin_scope(&self, scope: &str) -> Result<()> {
        self.scopes()?.insert(scope.to_string(), Vec::new());
        Ok(())
    }

    fn commit_scope(&self, scope: &str) -> Result<()> {
        self.scopes()?.remove(scope);
        Ok(())
    }

    fn rollback_scope(&self, scope: &str) -> Result<()> {
        let backups = self.scopes()?.remove(scope).unwrap_or_default();
        let mut failures = Vec::new();
        for backup in backups.iter().rev() {
            if let Err(e) = backup.restore() {
                failures.push(format!("{:#}", e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "Failed to roll back scope '{}': {}",
                scope,
                failures.join("; ")
            ))
        }
    }
}
