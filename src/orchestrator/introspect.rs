//! Read-only queries over an orchestrator.
//!
//! Queries never execute handlers, never touch the state store and are
//! never subject to rollback.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::Orchestrator;
use crate::errors::InvariantError;
use crate::ledger::SnapshotLedger;
use crate::state::State;

/// Strings `run` treats as queries rather than phase references.
pub const RESERVED_TOKENS: [&str; 5] = ["order", "cursor", "index", "name", "dump"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Query {
    /// Phase names in execution order
    Order,
    /// Index of the last committed phase
    Cursor,
    /// Name of the last committed phase
    Name,
    /// Everything at once
    Dump,
}

impl Query {
    pub fn as_str(&self) -> &'static str {
        match self {
            Query::Order => "order",
            Query::Cursor => "cursor",
            Query::Name => "name",
            Query::Dump => "dump",
        }
    }
}

impl FromStr for Query {
    type Err = InvariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "order" => Ok(Query::Order),
            "cursor" | "index" => Ok(Query::Cursor),
            "name" => Ok(Query::Name),
            "dump" => Ok(Query::Dump),
            _ => Err(InvariantError::UnknownQuery(s.to_string())),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One phase as shown in a dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub name: String,
    pub index: usize,
    /// Number of registered handlers
    pub handlers: usize,
}

/// Full picture of an orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dump {
    pub phases: Vec<PhaseSummary>,
    pub state: State,
    /// Snapshot ledger, keyed by phase index
    pub backups: SnapshotLedger,
    pub cursor: Option<usize>,
}

/// Answer to a `Query`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Introspection {
    Order(Vec<String>),
    Cursor(Option<usize>),
    Name(Option<String>),
    Dump(Dump),
}

impl Orchestrator {
    pub fn introspect(&self, query: Query) -> Introspection {
        match query {
            Query::Order => Introspection::Order(self.registry.names()),
            Query::Cursor => Introspection::Cursor(self.cursor.index()),
            Query::Name => Introspection::Name(self.current_phase().map(str::to_string)),
            Query::Dump => Introspection::Dump(self.dump()),
        }
    }

    /// Parse `token` and answer it.
    pub fn query(&self, token: &str) -> Result<Introspection, InvariantError> {
        Ok(self.introspect(token.parse()?))
    }

    pub fn dump(&self) -> Dump {
        let phases = self
            .registry
            .phases()
            .iter()
            .map(|p| PhaseSummary {
                name: p.name.clone(),
                index: p.index,
                handlers: self.registry.handler_count(p.index),
            })
            .collect();
        Dump {
            phases,
            state: self.store.working_copy(),
            backups: self.ledger.clone(),
            cursor: self.cursor.index(),
        }
    }
}
