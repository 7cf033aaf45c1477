//! Per-partition keyed state.
//!
//! Each stage worker owns one [`StateStore`]; stages mutate it only
//! through a [`StateHandle`] scoped to the current key, so safe per-key
//! state mutation needs no external locking. Checkpointing sees state
//! only as an opaque snapshot-and-restorable value.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

type Fields = HashMap<String, serde_json::Value>;

/// Maps a key to its partition index with a hash that is stable across
/// processes, so restored snapshots land on the same workers the routers
/// send live records to.
#[must_use]
pub fn partition(key: &str, partitions: usize) -> usize {
    if partitions <= 1 {
        return 0;
    }
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % partitions as u64) as usize
}

/// Keyed state owned by one stage worker.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    entries: HashMap<String, Fields>,
}

impl StateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle scoped to the given key.
    pub fn handle<'a>(&'a mut self, key: &'a str) -> StateHandle<'a> {
        StateHandle { key, store: self }
    }

    /// Snapshots the full store.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            entries: self.entries.clone(),
        }
    }

    /// Replaces the store contents with a snapshot, keeping only the
    /// keys this worker is responsible for.
    pub fn restore(&mut self, snapshot: &StateSnapshot, worker: usize, parallelism: usize) {
        self.entries = snapshot
            .entries
            .iter()
            .filter(|(key, _)| partition(key, parallelism) == worker)
            .map(|(key, fields)| (key.clone(), fields.clone()))
            .collect();
    }

    /// Number of keys with state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no key has state.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Narrow `get`/`put`/`delete` view over the state of one key.
#[derive(Debug)]
pub struct StateHandle<'a> {
    key: &'a str,
    store: &'a mut StateStore,
}

impl StateHandle<'_> {
    /// The key this handle is scoped to.
    #[must_use]
    pub fn key(&self) -> &str {
        self.key
    }

    /// Reads a field of the current key's state.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.store.entries.get(self.key).and_then(|f| f.get(field))
    }

    /// Writes a field of the current key's state.
    pub fn put(&mut self, field: impl Into<String>, value: serde_json::Value) {
        self.store
            .entries
            .entry(self.key.to_string())
            .or_default()
            .insert(field.into(), value);
    }

    /// Deletes all state of the current key.
    pub fn delete(&mut self) {
        self.store.entries.remove(self.key);
    }
}

/// A serializable snapshot of one store, or of a whole stage once worker
/// snapshots are merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    entries: HashMap<String, Fields>,
}

impl StateSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges another snapshot into this one.
    ///
    /// Worker key spaces are disjoint by construction, so merging never
    /// overwrites live entries.
    pub fn merge(&mut self, other: StateSnapshot) {
        self.entries.extend(other.entries);
    }

    /// Number of keys captured.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
