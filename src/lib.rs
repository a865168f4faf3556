//! Transactional phase orchestrator.
//!
//! Runs an application lifecycle as a fixed, ordered list of named phases.
//! Handlers registered against a phase see a working copy of the shared
//! state; the copy is committed only when every handler of the phase
//! succeeds. A failing phase is rolled back and the run stops, so the next
//! run resumes at the phase that failed.

pub mod config;
pub mod context;
pub mod effects;
pub mod errors;
pub mod handler;
pub mod ledger;
pub mod logger;
pub mod logging;
pub mod orchestrator;
pub mod phase;
pub mod state;

pub use context::ExecutionContext;
pub use effects::{EffectCoordinator, FileBackup, FsEffectJournal, NoopEffects};
pub use errors::{HandlerExecutionError, InvariantError, OrchestrationError, RegistrationError};
pub use handler::{
    FnHandler, Handler, HandlerCatalog, HandlerLoader, HandlerOutput, NoLoader, OnceLoader,
    Registration, ScriptHandler, ScriptLoader,
};
pub use ledger::{Snapshot, SnapshotLedger};
pub use logger::{EventLogger, LogContext, LogRecord, MemoryLogger, Severity, TracingLogger};
pub use orchestrator::{
    Checkpoint, CheckpointFile, Cursor, Dump, Introspection, Orchestrator, OrchestratorBuilder,
    PhaseSummary, Query, RunOutput, Target,
};
pub use phase::{DEFAULT_LIFECYCLE, Phase, PhaseRef, PhaseRegistry};
pub use state::{State, StateStore};
