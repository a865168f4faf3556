//! Snapshot ledger: one frozen state per committed phase.
//!
//! The snapshot stored under index `i` is the committed state phase `i`
//! transitioned *from*, i.e. the state right after phase `i - 1`. Restoring it
//! is "as if phase `i` never ran".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::state::State;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Position of the phase in the total order
    pub index: usize,
    /// Phase name
    pub phase: String,
    /// Committed state before the phase ran
    pub state: State,
    /// Store version the state belonged to
    pub version: u64,
    /// Short fingerprint of `state`
    pub digest: String,
    pub recorded_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn capture(index: usize, phase: &str, state: State, version: u64) -> Self {
        let digest = state.digest();
        Self {
            index,
            phase: phase.to_string(),
            state,
            version,
            digest,
            recorded_at: Utc::now(),
        }
    }
}

/// Append-only (during forward execution) map of phase index to snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotLedger {
    entries: BTreeMap<usize, Snapshot>,
}

impl SnapshotLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, index: usize, snapshot: Snapshot) {
        debug_assert!(
            !self.entries.contains_key(&index),
            "phase {index} recorded twice without a rewind"
        );
        self.entries.insert(index, snapshot);
    }

    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.entries.get(&index)
    }

    /// Snapshot of the most recently committed phase.
    pub fn latest(&self) -> Option<&Snapshot> {
        self.entries.values().next_back()
    }

    /// Snapshots in ascending phase order.
    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.entries.values()
    }

    /// Snapshots with the index they are stored under.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &Snapshot)> {
        self.entries.iter().map(|(index, snapshot)| (*index, snapshot))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop every snapshot at or after `index`.
    pub fn truncate_from(&mut self, index: usize) {
        self.entries.split_off(&index);
    }
}
