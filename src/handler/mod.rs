//! Handlers: the units of work queued against a phase.
//!
//! A handler comes in one of two forms:
//!
//! - **Inline**: a closure or `Handler` implementation registered directly.
//! - **Reference**: a string identifier resolved through a `HandlerLoader` the
//!   first time its phase runs (for example a script file on disk).
//!
//! Every handler is invoked with the phase name and an `ExecutionContext`
//! bound to the phase's working copy of the state. It may mutate the context
//! directly, return `HandlerOutput::Merge` to overlay keys, or return
//! `HandlerOutput::Unchanged`.
//!
//! # Usage
//!
//! ```ignore
//! use phasewright::handler::{HandlerOutput, Registration};
//!
//! orchestrator.register("boot", Registration::inline(|_phase, _ctx| {
//!     Ok(HandlerOutput::merge([("x", 1)]))
//! }));
//! orchestrator.register("persist", Registration::reference("persist.sh"));
//! ```

pub mod loader;
pub mod script;

use anyhow::Result;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::state::State;

pub use loader::{HandlerCatalog, HandlerLoader, NoLoader, OnceLoader};
pub use script::{ScriptHandler, ScriptLoader};

/// A unit of work executed once per phase attempt.
pub trait Handler: Send + Sync {
    /// Run against the working copy of the phase.
    ///
    /// Returning `Err` (or panicking) fails the whole phase.
    fn call(&self, phase: &str, ctx: &mut ExecutionContext<'_>) -> Result<HandlerOutput>;

    /// Human-readable name used in logs and errors.
    fn label(&self) -> String {
        "inline".to_string()
    }
}

/// What a handler hands back to the driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum HandlerOutput {
    /// No state change beyond what the handler did through its context.
    /// Covers both "returned nothing" and "returned itself".
    #[default]
    Unchanged,
    /// Keys to overlay onto the working copy (shallow, last writer wins).
    Merge(State),
}

impl HandlerOutput {
    pub fn unchanged() -> Self {
        Self::Unchanged
    }

    pub fn merge<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Merge(pairs.into_iter().collect())
    }
}

impl From<State> for HandlerOutput {
    fn from(state: State) -> Self {
        Self::Merge(state)
    }
}

impl From<Option<State>> for HandlerOutput {
    fn from(state: Option<State>) -> Self {
        state.map(Self::Merge).unwrap_or_default()
    }
}

/// Adapter turning a closure into a `Handler`.
pub struct FnHandler<F> {
    f: F,
    label: String,
}

impl<F> FnHandler<F>
where
    F: Fn(&str, &mut ExecutionContext<'_>) -> Result<HandlerOutput> + Send + Sync,
{
    pub fn new(label: impl Into<String>, f: F) -> Self {
        Self {
            f,
            label: label.into(),
        }
    }
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&str, &mut ExecutionContext<'_>) -> Result<HandlerOutput> + Send + Sync,
{
    fn call(&self, phase: &str, ctx: &mut ExecutionContext<'_>) -> Result<HandlerOutput> {
        (self.f)(phase, ctx)
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

/// A handler as queued in the registry.
#[derive(Clone)]
pub enum Registration {
    Inline(Arc<dyn Handler>),
    Reference(String),
}

impl Registration {
    /// Register a closure.
    pub fn inline<F>(f: F) -> Self
    where
        F: Fn(&str, &mut ExecutionContext<'_>) -> Result<HandlerOutput> + Send + Sync + 'static,
    {
        Self::Inline(Arc::new(FnHandler::new("inline", f)))
    }

    /// Register a closure under a label that shows up in errors.
    pub fn named<F>(label: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str, &mut ExecutionContext<'_>) -> Result<HandlerOutput> + Send + Sync + 'static,
    {
        Self::Inline(Arc::new(FnHandler::new(label, f)))
    }

    pub fn handler(handler: Arc<dyn Handler>) -> Self {
        Self::Inline(handler)
    }

    pub fn reference(reference: impl Into<String>) -> Self {
        Self::Reference(reference.into())
    }

    pub fn label(&self) -> String {
        match self {
            Registration::Inline(h) => h.label(),
            Registration::Reference(r) => r.clone(),
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Registration::Reference(_))
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Registration::Inline(h) => f.debug_tuple("Inline").field(&h.label()).finish(),
            Registration::Reference(r) => f.debug_tuple("Reference").field(r).finish(),
        }
    }
}
