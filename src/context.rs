//! Per-attempt execution context handed to handlers.
//!
//! A context is bound to one phase attempt's working copy and nothing else:
//! it cannot reach the snapshot ledger, the registry, or any other phase.
//! A fresh context is built for every handler call and dropped right after.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::state::State;

pub struct ExecutionContext<'a> {
    phase: &'a str,
    index: usize,
    working: &'a mut State,
}

impl<'a> ExecutionContext<'a> {
    pub fn bind(phase: &'a str, index: usize, working: &'a mut State) -> Self {
        Self {
            phase,
            index,
            working,
        }
    }

    /// Name of the phase being executed.
    pub fn phase(&self) -> &str {
        self.phase
    }

    /// Position of the phase in the total order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.working.get(key)
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.working.get_as(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.working.insert(key, value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.working.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.working.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.working.keys()
    }

    /// Read-only view of the whole working copy.
    pub fn state(&self) -> &State {
        &*self.working
    }
}
