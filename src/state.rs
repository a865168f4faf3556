//! Versioned key/value state shared by every phase.
//!
//! `State` is the value type handlers see (through a working copy) and the
//! orchestrator commits. `StateStore` owns the committed value and bumps a
//! version counter on every commit.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::collections::btree_map;

/// Mapping of string keys to arbitrary JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(BTreeMap<String, Value>);

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Deserialize the value under `key`, returning `None` when absent or mistyped.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Shallow merge: every key of `other` overwrites the key here.
    pub fn merge(&mut self, other: State) {
        self.0.extend(other.0);
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }

    /// Short SHA256 fingerprint of the canonical JSON encoding.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        // BTreeMap keys serialize in sorted order, so equal states hash equally.
        if let Ok(bytes) = serde_json::to_vec(&self.0) {
            hasher.update(&bytes);
        }
        let result = hasher.finalize();
        format!("{:x}", result)[..12].to_string()
    }
}

impl From<BTreeMap<String, Value>> for State {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl<K, V> FromIterator<(K, V)> for State
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl IntoIterator for State {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a State {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Owner of the committed state.
///
/// Only the orchestrator holds a `StateStore`; handlers only ever see a clone
/// obtained from `working_copy`.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    current: State,
    version: u64,
}

impl StateStore {
    pub fn new(seed: State) -> Self {
        Self {
            current: seed,
            version: 0,
        }
    }

    pub fn state(&self) -> &State {
        &self.current
    }

    /// Number of commits since construction or the last reset.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn working_copy(&self) -> State {
        self.current.clone()
    }

    /// Replace the committed state and return the new version.
    pub fn commit(&mut self, next: State) -> u64 {
        self.current = next;
        self.version += 1;
        self.version
    }

    /// Put back a previously observed state/version pair.
    pub fn restore(&mut self, state: State, version: u64) {
        self.current = state;
        self.version = version;
    }

    pub fn reset(&mut self, seed: State) {
        self.restore(seed, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // =========================================
    // State tests
    // =========================================

    #[test]
    fn test_state_insert_and_get() {
        let mut state = State::new();
        assert!(state.is_empty());
        state.insert("x", 1);
        state.insert("name", "boot");

        assert_eq!(state.len(), 2);
        assert_eq!(state.get("x"), Some(&json!(1)));
        assert_eq!(state.get_as::<String>("name").as_deref(), Some("boot"));
        assert!(state.get_as::<u64>("name").is_none());
        assert!(state.contains_key("x"));
        assert!(!state.contains_key("y"));
    }

    #[test]
    fn test_state_merge_is_shallow_last_writer_wins() {
        let mut state: State = [("a", json!(1)), ("nested", json!({"keep": true}))]
            .into_iter()
            .collect();
        let incoming: State = [("a", json!(2)), ("b", json!(3)), ("nested", json!({"new": 1}))]
            .into_iter()
            .collect();

        state.merge(incoming);

        assert_eq!(state.get("a"), Some(&json!(2)));
        assert_eq!(state.get("b"), Some(&json!(3)));
        // No deep merge: the nested object is replaced wholesale
        assert_eq!(state.get("nested"), Some(&json!({"new": 1})));
    }

    #[test]
    fn test_state_keys_are_sorted() {
        let state: State = [("b", 1), ("a", 2), ("c", 3)].into_iter().collect();
        let keys: Vec<_> = state.keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_state_digest_is_stable_and_content_sensitive() {
        let a: State = [("x", 1), ("y", 2)].into_iter().collect();
        let b: State = [("y", 2), ("x", 1)].into_iter().collect();
        let c: State = [("x", 1), ("y", 3)].into_iter().collect();

        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest().len(), 12);
    }

    #[test]
    fn test_state_serializes_as_plain_object() {
        let state: State = [("x", 1)].into_iter().collect();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json, json!({"x": 1}));

        let parsed: State = serde_json::from_value(json!({"k": [1, 2]})).unwrap();
        assert_eq!(parsed.get("k"), Some(&json!([1, 2])));
    }

    // =========================================
    // StateStore tests
    // =========================================

    #[test]
    fn test_store_commit_bumps_version() {
        let mut store = StateStore::new(State::new());
        assert_eq!(store.version(), 0);

        let mut copy = store.working_copy();
        copy.insert("x", 1);
        // Working copy is detached from the committed state
        assert!(store.state().is_empty());

        assert_eq!(store.commit(copy), 1);
        assert_eq!(store.state().get("x"), Some(&json!(1)));
    }

    #[test]
    fn test_store_reset_restores_seed() {
        let seed: State = [("app", "demo")].into_iter().collect();
        let mut store = StateStore::new(seed.clone());
        store.commit([("x", 1)].into_iter().collect());

        store.reset(seed.clone());
        assert_eq!(store.state(), &seed);
        assert_eq!(store.version(), 0);
    }
}
