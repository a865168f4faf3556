//! Typed error hierarchy for the phase orchestrator.
//!
//! Three kinds cover the failure taxonomy:
//! - `RegistrationError`: non-fatal, surfaced by `register` as `false`
//! - `HandlerExecutionError`: a handler failed; the phase was rolled back
//! - `InvariantError`: caller misuse (unknown target, bad token, bad phase list)
//!
//! `OrchestrationError` wraps the two fatal kinds for `run` and friends.

use thiserror::Error;

/// Why a handler could not be queued against a phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("Unknown phase reference '{0}'")]
    UnknownPhase(String),

    #[error("Handler reference is empty")]
    EmptyReference,

    #[error("Handler reference '{0}' cannot be resolved by the loader")]
    UnresolvableReference(String),
}

/// A handler raised an error (or panicked) while its phase was running.
///
/// The phase's working copy has been discarded and the effect coordinator has
/// been asked to roll back the phase scope before this error is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Phase '{phase}' failed at handler {handler_index} ({handler}): {message}")]
pub struct HandlerExecutionError {
    pub phase: String,
    pub phase_index: usize,
    pub handler_index: usize,
    pub handler: String,
    pub message: String,
    /// Set when the effect coordinator itself failed to roll back.
    pub rollback_error: Option<String>,
}

/// Caller misuse of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantError {
    #[error("Unknown phase '{0}'")]
    UnknownPhase(String),

    #[error("Unknown introspection token '{0}'. Valid tokens: order, cursor, index, name, dump")]
    UnknownQuery(String),

    #[error("Invalid phase list: {0}")]
    InvalidPhases(String),

    #[error("Phase '{0}' has not been committed")]
    PhaseNotCommitted(String),

    #[error("Corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),

    #[error("Checkpoint phase order {found:?} does not match orchestrator phase order {expected:?}")]
    CheckpointMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
}

/// Fatal errors returned by the orchestrator driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    HandlerExecution(#[from] HandlerExecutionError),

    #[error(transparent)]
    Invariant(#[from] InvariantError),
}

impl OrchestrationError {
    /// The failed handler, when this error came from a phase attempt.
    pub fn handler_failure(&self) -> Option<&HandlerExecutionError> {
        match self {
            OrchestrationError::HandlerExecution(e) => Some(e),
            OrchestrationError::Invariant(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_failure() -> HandlerExecutionError {
        HandlerExecutionError {
            phase: "persist".to_string(),
            phase_index: 2,
            handler_index: 0,
            handler: "inline".to_string(),
            message: "disk full".to_string(),
            rollback_error: None,
        }
    }

    #[test]
    fn test_handler_execution_error_names_phase_and_index() {
        let err = sample_failure();
        let text = err.to_string();
        assert!(text.contains("persist"));
        assert!(text.contains("handler 0"));
        assert!(text.contains("disk full"));
    }

    #[test]
    fn test_orchestration_error_converts_from_handler_failure() {
        let err: OrchestrationError = sample_failure().into();
        let failure = err.handler_failure().unwrap();
        assert_eq!(failure.phase_index, 2);
        // Display is forwarded unchanged
        assert_eq!(err.to_string(), sample_failure().to_string());
    }

    #[test]
    fn test_orchestration_error_converts_from_invariant() {
        let err: OrchestrationError = InvariantError::UnknownQuery("bogus".into()).into();
        assert!(err.handler_failure().is_none());
        assert!(err.to_string().contains("bogus"));
        assert!(matches!(
            err,
            OrchestrationError::Invariant(InvariantError::UnknownQuery(_))
        ));
    }

    #[test]
    fn test_registration_error_variants_are_distinct() {
        let unknown = RegistrationError::UnknownPhase("nope".into());
        let unresolvable = RegistrationError::UnresolvableReference("x.sh".into());
        assert!(matches!(unknown, RegistrationError::UnknownPhase(_)));
        assert!(!matches!(unresolvable, RegistrationError::UnknownPhase(_)));
        assert!(unresolvable.to_string().contains("x.sh"));
    }

    #[test]
    fn test_checkpoint_mismatch_lists_both_orders() {
        let err = InvariantError::CheckpointMismatch {
            expected: vec!["boot".into()],
            found: vec!["start".into()],
        };
        let text = err.to_string();
        assert!(text.contains("boot"));
        assert!(text.contains("start"));
    }

    #[test]
    fn test_all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&RegistrationError::EmptyReference);
        assert_std_error(&sample_failure());
        assert_std_error(&InvariantError::UnknownPhase("x".into()));
        assert_std_error(&OrchestrationError::from(sample_failure()));
    }
}
