//! The orchestrator driver.
//!
//! An `Orchestrator` owns the committed state, the snapshot ledger and the
//! cursor. `run` executes every phase between the cursor and the target in
//! order; each phase works on a private copy of the state that is committed
//! only if every handler of the phase succeeds. A failing phase leaves the
//! state and cursor untouched, asks the effect coordinator to roll back the
//! phase scope once, and stops the run. Running again retries from the
//! failed phase.
//!
//! # Usage
//!
//! ```ignore
//! use phasewright::{HandlerOutput, Orchestrator, PhaseRegistry, Registration};
//!
//! let registry = PhaseRegistry::new(["boot", "execute", "persist"])?;
//! let mut orchestrator = Orchestrator::new(registry);
//! orchestrator.register("boot", Registration::inline(|_, _| {
//!     Ok(HandlerOutput::merge([("x", 1)]))
//! }));
//! let state = orchestrator.run_all()?;
//! ```

pub mod checkpoint;
pub mod introspect;

pub use checkpoint::{Checkpoint, CheckpointFile};
pub use introspect::{Dump, Introspection, PhaseSummary, Query, RESERVED_TOKENS};

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn};

use crate::context::ExecutionContext;
use crate::effects::{EffectCoordinator, NoopEffects};
use crate::errors::{HandlerExecutionError, InvariantError, OrchestrationError, RegistrationError};
use crate::handler::{Handler, HandlerLoader, HandlerOutput, NoLoader, OnceLoader, Registration};
use crate::ledger::{Snapshot, SnapshotLedger};
use crate::logger::{EventLogger, LogContext, Severity, TracingLogger};
use crate::phase::{PhaseRef, PhaseRegistry};
use crate::state::{State, StateStore};

/// Index of the last fully committed phase; `None` before phase 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(Option<usize>);

impl Cursor {
    pub const START: Cursor = Cursor(None);

    pub fn at(index: usize) -> Self {
        Self(Some(index))
    }

    pub fn index(&self) -> Option<usize> {
        self.0
    }

    /// First phase that has not been committed yet.
    pub fn next(&self) -> usize {
        self.0.map(|i| i + 1).unwrap_or(0)
    }

    pub fn has_committed(&self, index: usize) -> bool {
        self.0.is_some_and(|i| index <= i)
    }
}

impl From<Option<usize>> for Cursor {
    fn from(index: Option<usize>) -> Self {
        Self(index)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(i) => write!(f, "{}", i),
            None => write!(f, "none"),
        }
    }
}

/// What a call to `run` should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every remaining phase through the last one.
    All,
    /// Remaining phases up to and including this one.
    Phase(PhaseRef),
    /// A read-only query; nothing executes.
    Query(Query),
}

impl Target {
    /// Interpret a caller-supplied string.
    ///
    /// Introspection tokens win over everything else, then positions, then
    /// names. A blank string means every remaining phase.
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Target::All;
        }
        if let Ok(query) = trimmed.parse::<Query>() {
            return Target::Query(query);
        }
        Target::Phase(PhaseRef::from(trimmed))
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target::parse(s)
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        Target::parse(&s)
    }
}

impl From<PhaseRef> for Target {
    fn from(phase: PhaseRef) -> Self {
        Target::Phase(phase)
    }
}

impl From<usize> for Target {
    fn from(position: usize) -> Self {
        Target::Phase(PhaseRef::Position(position))
    }
}

impl From<Query> for Target {
    fn from(query: Query) -> Self {
        Target::Query(query)
    }
}

impl<T: Into<Target>> From<Option<T>> for Target {
    fn from(target: Option<T>) -> Self {
        target.map(Into::into).unwrap_or(Target::All)
    }
}

/// Result of `run`: the committed state, or the answer to a query.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutput {
    State(State),
    Introspection(Introspection),
}

impl RunOutput {
    pub fn state(&self) -> Option<&State> {
        match self {
            RunOutput::State(s) => Some(s),
            RunOutput::Introspection(_) => None,
        }
    }

    pub fn into_state(self) -> Option<State> {
        match self {
            RunOutput::State(s) => Some(s),
            RunOutput::Introspection(_) => None,
        }
    }

    pub fn introspection(&self) -> Option<&Introspection> {
        match self {
            RunOutput::Introspection(i) => Some(i),
            RunOutput::State(_) => None,
        }
    }
}

pub struct OrchestratorBuilder {
    registry: PhaseRegistry,
    seed: State,
    loader: Option<Box<dyn HandlerLoader>>,
    effects: Option<Arc<dyn EffectCoordinator>>,
    logger: Option<Arc<dyn EventLogger>>,
}

impl OrchestratorBuilder {
    /// Initial state, restored again by `reset`.
    pub fn seed(mut self, seed: State) -> Self {
        self.seed = seed;
        self
    }

    pub fn loader<L: HandlerLoader + 'static>(mut self, loader: L) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }

    pub fn effects(mut self, effects: Arc<dyn EffectCoordinator>) -> Self {
        self.effects = Some(effects);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn EventLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Orchestrator {
        let loader = self.loader.unwrap_or_else(|| Box::new(NoLoader));
        Orchestrator {
            registry: self.registry,
            store: StateStore::new(self.seed.clone()),
            seed: self.seed,
            ledger: SnapshotLedger::new(),
            cursor: Cursor::START,
            loader: OnceLoader::new(loader),
            effects: self.effects.unwrap_or_else(|| Arc::new(NoopEffects)),
            logger: self.logger.unwrap_or_else(|| Arc::new(TracingLogger)),
        }
    }
}

/// Drives phases in order with per-phase commit or rollback.
///
/// All mutating operations take `&mut self`; callers that share an
/// orchestrator across threads must serialize access themselves.
pub struct Orchestrator {
    registry: PhaseRegistry,
    store: StateStore,
    seed: State,
    ledger: SnapshotLedger,
    cursor: Cursor,
    loader: OnceLoader<Box<dyn HandlerLoader>>,
    effects: Arc<dyn EffectCoordinator>,
    logger: Arc<dyn EventLogger>,
}

impl Orchestrator {
    pub fn builder(registry: PhaseRegistry) -> OrchestratorBuilder {
        OrchestratorBuilder {
            registry,
            seed: State::new(),
            loader: None,
            effects: None,
            logger: None,
        }
    }

    /// Orchestrator with an empty seed and default collaborators.
    pub fn new(registry: PhaseRegistry) -> Self {
        Self::builder(registry).build()
    }

    // =========================================
    // Registration
    // =========================================

    /// Queue a handler. Returns `false` for an unknown phase or an
    /// unresolvable reference; nothing is executed either way.
    pub fn register(&mut self, phase: impl Into<PhaseRef>, registration: Registration) -> bool {
        match self.try_register(phase, registration) {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Handler registration rejected");
                false
            }
        }
    }

    /// Like `register`, but reports why a registration was rejected.
    pub fn try_register(
        &mut self,
        phase: impl Into<PhaseRef>,
        registration: Registration,
    ) -> Result<usize, RegistrationError> {
        let phase = phase.into();
        let label = registration.label();
        let position = self.registry.register(&phase, registration, &self.loader)?;
        debug!(phase = %phase, handler = %label, position, "Handler registered");
        Ok(position)
    }

    // =========================================
    // Execution
    // =========================================

    /// Execute phases or answer a query, depending on `target`.
    pub fn run(&mut self, target: impl Into<Target>) -> Result<RunOutput, OrchestrationError> {
        match target.into() {
            Target::Query(query) => Ok(RunOutput::Introspection(self.introspect(query))),
            Target::All => self.run_all().map(RunOutput::State),
            Target::Phase(phase) => self.run_to(phase).map(RunOutput::State),
        }
    }

    /// Execute every remaining phase.
    pub fn run_all(&mut self) -> Result<State, OrchestrationError> {
        let last = self.registry.len().saturating_sub(1);
        self.run_through(last)?;
        Ok(self.store.working_copy())
    }

    /// Execute remaining phases up to and including `phase`.
    pub fn run_to(&mut self, phase: impl Into<PhaseRef>) -> Result<State, OrchestrationError> {
        let phase = phase.into();
        let target = self
            .registry
            .resolve(&phase)
            .ok_or_else(|| InvariantError::UnknownPhase(phase.to_string()))?;
        self.run_through(target)?;
        Ok(self.store.working_copy())
    }

    fn run_through(&mut self, target: usize) -> Result<(), HandlerExecutionError> {
        let start = self.cursor.next();
        if start > target {
            debug!(target_index = target, cursor = %self.cursor, "Target already committed, nothing to run");
            return Ok(());
        }
        for index in start..=target {
            self.run_phase(index)?;
        }
        Ok(())
    }

    fn run_phase(&mut self, index: usize) -> Result<(), HandlerExecutionError> {
        let name = self.registry.name(index).unwrap_or_default().to_string();
        let span = info_span!("phase", name = %name, index);
        let _guard = span.enter();

        let handlers = self.registry.handlers(index).to_vec();
        debug!(handlers = handlers.len(), "Starting phase");

        let mut working = self.store.working_copy();
        for (handler_index, registration) in handlers.iter().enumerate() {
            let label = registration.label();
            let handler = match self.resolve_handler(registration) {
                Ok(handler) => handler,
                Err(e) => {
                    return Err(self.fail(&name, index, handler_index, label, format!("{:#}", e)));
                }
            };

            debug!(handler_index, handler = %label, "Running handler");
            let outcome = {
                let mut ctx = ExecutionContext::bind(&name, index, &mut working);
                panic::catch_unwind(AssertUnwindSafe(|| handler.call(&name, &mut ctx)))
            };

            match outcome {
                Ok(Ok(HandlerOutput::Unchanged)) => {}
                Ok(Ok(HandlerOutput::Merge(delta))) => working.merge(delta),
                Ok(Err(e)) => {
                    return Err(self.fail(&name, index, handler_index, label, format!("{:#}", e)));
                }
                Err(payload) => {
                    let message = format!("handler panicked: {}", panic_message(payload.as_ref()));
                    return Err(self.fail(&name, index, handler_index, label, message));
                }
            }
        }

        let before = self.store.working_copy();
        let before_version = self.store.version();
        let version = self.store.commit(working);
        self.ledger
            .record(index, Snapshot::capture(index, &name, before, before_version));
        self.cursor = Cursor::at(index);

        info!(version, handlers = handlers.len(), "Phase committed");
        Ok(())
    }

    fn resolve_handler(&self, registration: &Registration) -> anyhow::Result<Arc<dyn Handler>> {
        match registration {
            Registration::Inline(handler) => Ok(Arc::clone(handler)),
            Registration::Reference(reference) => self.loader.load(reference),
        }
    }

    /// Roll back the phase scope, report the failure, and build the error.
    fn fail(
        &self,
        phase: &str,
        phase_index: usize,
        handler_index: usize,
        handler: String,
        message: String,
    ) -> HandlerExecutionError {
        error!(handler_index, handler = %handler, error = %message, "Handler failed, rolling back phase");

        let rollback_error = match self.effects.rollback_scope(phase) {
            Ok(()) => None,
            Err(e) => {
                let rollback_message = format!("{:#}", e);
                warn!(error = %rollback_message, "Effect rollback failed");
                Some(rollback_message)
            }
        };

        let context = LogContext::phase(phase, phase_index)
            .with_handler(handler_index, handler.clone())
            .with_error(message.clone());
        self.logger.record(
            &format!("Phase '{}' failed", phase),
            Severity::Error,
            &context,
        );
        if let Some(rollback_message) = &rollback_error {
            self.logger.record(
                &format!("Rollback of phase '{}' failed", phase),
                Severity::Warning,
                &context.clone().with_error(rollback_message.clone()),
            );
        }

        HandlerExecutionError {
            phase: phase.to_string(),
            phase_index,
            handler_index,
            handler,
            message,
            rollback_error,
        }
    }

    // =========================================
    // Explicit external actions
    // =========================================

    /// Forget all progress: state back to the seed, ledger and cursor cleared.
    pub fn reset(&mut self) {
        self.store.reset(self.seed.clone());
        self.ledger.clear();
        self.cursor = Cursor::START;
        info!("Orchestrator reset");
    }

    /// Undo committed phases from `phase` onward, as if it never ran.
    ///
    /// Only orchestrator bookkeeping is rewound; filesystem effects of the
    /// rewound phases stay in place.
    pub fn rewind_to(&mut self, phase: impl Into<PhaseRef>) -> Result<(), InvariantError> {
        let phase = phase.into();
        let index = self
            .registry
            .resolve(&phase)
            .ok_or_else(|| InvariantError::UnknownPhase(phase.to_string()))?;
        let name = self.registry.name(index).unwrap_or_default().to_string();

        if !self.cursor.has_committed(index) {
            return Err(InvariantError::PhaseNotCommitted(name));
        }
        let snapshot = self
            .ledger
            .get(index)
            .cloned()
            .ok_or_else(|| InvariantError::PhaseNotCommitted(name.clone()))?;

        self.store.restore(snapshot.state, snapshot.version);
        self.ledger.truncate_from(index);
        self.cursor = index.checked_sub(1).into();
        info!(phase = %name, cursor = %self.cursor, "Rewound orchestrator");
        Ok(())
    }

    // =========================================
    // Accessors
    // =========================================

    /// Committed state.
    pub fn state(&self) -> &State {
        self.store.state()
    }

    pub fn version(&self) -> u64 {
        self.store.version()
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn ledger(&self) -> &SnapshotLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &PhaseRegistry {
        &self.registry
    }

    /// Name of the last committed phase.
    pub fn current_phase(&self) -> Option<&str> {
        self.cursor.index().and_then(|i| self.registry.name(i))
    }

    /// Whether every phase has been committed.
    pub fn is_complete(&self) -> bool {
        self.cursor.next() >= self.registry.len()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
