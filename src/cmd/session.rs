//! Builds an orchestrator from resolved settings and keeps its checkpoint.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use phasewright::config::Settings;
use phasewright::effects::{EffectCoordinator, FsEffectJournal};
use phasewright::handler::{HandlerOutput, Registration, ScriptLoader};
use phasewright::orchestrator::{CheckpointFile, Orchestrator};

pub struct Session {
    pub orchestrator: Orchestrator,
    pub checkpoint: CheckpointFile,
}

impl Session {
    /// Build the orchestrator described by `settings` and restore any saved
    /// progress.
    ///
    /// Phases with scripts that declare tracked files are bracketed by two
    /// inline handlers: the first opens a fresh journal scope for the phase,
    /// the last closes it once every script has succeeded.
    pub fn open(settings: &Settings) -> Result<Self> {
        let registry = settings
            .toml
            .registry()
            .context("Invalid phase list in configuration")?;

        let journal = Arc::new(FsEffectJournal::new());
        let mut loader = ScriptLoader::new(&settings.handlers_dir, settings.timeout)
            .with_working_dir(&settings.project_dir)
            .with_effects(Arc::clone(&journal));
        for handler in settings.toml.enabled_handlers() {
            if handler.tracks.is_empty() {
                continue;
            }
            let Some(phase) = registry
                .resolve(&handler.phase)
                .and_then(|i| registry.name(i))
            else {
                continue;
            };
            let paths: Vec<PathBuf> = handler
                .tracks
                .iter()
                .map(|p| settings.project_path(p))
                .collect();
            loader = loader.with_tracked(phase, handler.script.clone(), paths);
        }

        let mut orchestrator = Orchestrator::builder(registry)
            .seed(settings.toml.seed.clone())
            .loader(loader)
            .effects(journal.clone())
            .build();

        let scoped: BTreeSet<usize> = settings
            .toml
            .enabled_handlers()
            .filter(|h| !h.tracks.is_empty())
            .filter_map(|h| orchestrator.registry().resolve(&h.phase))
            .collect();

        for &index in &scoped {
            let journal = Arc::clone(&journal);
            orchestrator.try_register(
                index,
                Registration::named("journal:begin", move |phase, _| {
                    journal.begin_scope(phase)?;
                    Ok(HandlerOutput::Unchanged)
                }),
            )?;
        }

        for handler in settings.toml.enabled_handlers() {
            if let Err(e) = orchestrator
                .try_register(handler.phase.clone(), Registration::reference(handler.script.clone()))
            {
                warn!(script = %handler.script, phase = %handler.phase, error = %e, "Skipping handler");
            }
        }

        for &index in &scoped {
            let journal = Arc::clone(&journal);
            orchestrator.try_register(
                index,
                Registration::named("journal:commit", move |phase, _| {
                    journal.commit_scope(phase)?;
                    Ok(HandlerOutput::Unchanged)
                }),
            )?;
        }

        let checkpoint = settings.checkpoint_file();
        if let Some(saved) = checkpoint.load()? {
            orchestrator.restore(saved).with_context(|| {
                format!(
                    "Cannot resume from checkpoint {}. Run 'phasewright reset' to start over",
                    checkpoint.path().display()
                )
            })?;
            debug!(cursor = %orchestrator.cursor(), "Resumed from checkpoint");
        }

        Ok(Self {
            orchestrator,
            checkpoint,
        })
    }

    pub fn save(&self) -> Result<()> {
        self.checkpoint.save(&self.orchestrator.checkpoint())
    }
}
