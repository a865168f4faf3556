//! Phase definitions and the phase registry.
//!
//! This module provides:
//! - `Phase`: a name plus its fixed position in the total order
//! - `PhaseRef`: how callers address a phase (by name or by position)
//! - `PhaseRegistry`: the ordered phase list and each phase's handler queue
//! - `DEFAULT_LIFECYCLE`: the eight-phase application lifecycle

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use crate::errors::{InvariantError, RegistrationError};
use crate::handler::{HandlerLoader, Registration};
use crate::orchestrator::introspect::RESERVED_TOKENS;

/// Phases of a typical application run, in order.
pub const DEFAULT_LIFECYCLE: [&str; 8] = [
    "boot",
    "configure",
    "route",
    "validate",
    "execute",
    "render",
    "persist",
    "shutdown",
];

/// A named stage with a fixed position in the total order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub index: usize,
}

/// Reference to a phase by name or by position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PhaseRef {
    Position(usize),
    Name(String),
}

impl PhaseRef {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }
}

impl FromStr for PhaseRef {
    type Err = Infallible;

    /// All-digit strings are positions; anything else is a name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if !trimmed.is_empty()
            && trimmed.bytes().all(|b| b.is_ascii_digit())
            && let Ok(position) = trimmed.parse::<usize>()
        {
            return Ok(Self::Position(position));
        }
        Ok(Self::Name(trimmed.to_string()))
    }
}

impl fmt::Display for PhaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseRef::Position(p) => write!(f, "{}", p),
            PhaseRef::Name(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for PhaseRef {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(r) => r,
            Err(never) => match never {},
        }
    }
}

impl From<String> for PhaseRef {
    fn from(s: String) -> Self {
        PhaseRef::from(s.as_str())
    }
}

impl From<usize> for PhaseRef {
    fn from(position: usize) -> Self {
        Self::Position(position)
    }
}

/// Fixed, ordered list of phases and their handler queues.
#[derive(Debug, Clone)]
pub struct PhaseRegistry {
    phases: Vec<Phase>,
    handlers: Vec<Vec<Registration>>,
}

impl PhaseRegistry {
    /// Build a registry from an ordered list of phase names.
    ///
    /// The list must be non-empty, free of duplicates and blank names, and
    /// must not reuse an introspection token or look like a position.
    pub fn new<I, S>(names: I) -> Result<Self, InvariantError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(InvariantError::InvalidPhases(
                "at least one phase is required".to_string(),
            ));
        }

        let mut phases: Vec<Phase> = Vec::with_capacity(names.len());
        for (index, name) in names.into_iter().enumerate() {
            if name.trim().is_empty() || name.trim() != name {
                return Err(InvariantError::InvalidPhases(format!(
                    "phase {} has a blank or padded name '{}'",
                    index, name
                )));
            }
            if name.bytes().all(|b| b.is_ascii_digit()) {
                return Err(InvariantError::InvalidPhases(format!(
                    "phase name '{}' is numeric and would shadow a position",
                    name
                )));
            }
            if RESERVED_TOKENS
                .iter()
                .any(|token| token.eq_ignore_ascii_case(&name))
            {
                return Err(InvariantError::InvalidPhases(format!(
                    "phase name '{}' is reserved for introspection",
                    name
                )));
            }
            if phases.iter().any(|p| p.name == name) {
                return Err(InvariantError::InvalidPhases(format!(
                    "duplicate phase '{}'",
                    name
                )));
            }
            phases.push(Phase { name, index });
        }

        let handlers = vec![Vec::new(); phases.len()];
        Ok(Self { phases, handlers })
    }

    /// Registry over `DEFAULT_LIFECYCLE`.
    pub fn default_lifecycle() -> Self {
        let phases: Vec<Phase> = DEFAULT_LIFECYCLE
            .iter()
            .enumerate()
            .map(|(index, name)| Phase {
                name: name.to_string(),
                index,
            })
            .collect();
        let handlers = vec![Vec::new(); phases.len()];
        Self { phases, handlers }
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn phase(&self, index: usize) -> Option<&Phase> {
        self.phases.get(index)
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.phases.get(index).map(|p| p.name.as_str())
    }

    /// Phase names in execution order.
    pub fn names(&self) -> Vec<String> {
        self.phases.iter().map(|p| p.name.clone()).collect()
    }

    /// Position of the phase `phase_ref` points at.
    ///
    /// Names are matched first; a name that is not a phase but parses as a
    /// number is then tried as a position.
    pub fn resolve(&self, phase_ref: &PhaseRef) -> Option<usize> {
        match phase_ref {
            PhaseRef::Position(p) => (*p < self.phases.len()).then_some(*p),
            PhaseRef::Name(name) => self
                .phases
                .iter()
                .position(|p| p.name == *name)
                .or_else(|| {
                    name.parse::<usize>()
                        .ok()
                        .filter(|p| *p < self.phases.len())
                }),
        }
    }

    /// Queue `registration` against a phase.
    ///
    /// References are only checked for resolvability; nothing is loaded or
    /// executed here. Returns the handler's position in the phase queue.
    pub fn register(
        &mut self,
        phase_ref: &PhaseRef,
        registration: Registration,
        loader: &dyn HandlerLoader,
    ) -> Result<usize, RegistrationError> {
        let index = self
            .resolve(phase_ref)
            .ok_or_else(|| RegistrationError::UnknownPhase(phase_ref.to_string()))?;

        if let Registration::Reference(reference) = &registration {
            if reference.trim().is_empty() {
                return Err(RegistrationError::EmptyReference);
            }
            if !loader.exists(reference) {
                return Err(RegistrationError::UnresolvableReference(reference.clone()));
            }
        }

        let queue = &mut self.handlers[index];
        queue.push(registration);
        Ok(queue.len() - 1)
    }

    pub fn handler_count(&self, index: usize) -> usize {
        self.handlers.get(index).map(Vec::len).unwrap_or(0)
    }

    /// Handlers of a phase in registration order.
    pub fn handlers(&self, index: usize) -> &[Registration] {
        self.handlers.get(index).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for PhaseRegistry {
    fn default() -> Self {
        Self::default_lifecycle()
    }
}
