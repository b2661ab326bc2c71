//! Persisted key-value store port and the in-memory fallback.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use crate::domain::QueueError;

/// Namespaced text storage the persisted pool lives in. Implementations are
/// localStorage-like: get/set/remove plus enumeration of existing keys.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value. A `Storage` error signals an unrecoverable environment
    /// condition (quota exhaustion and the like), not a transient one.
    fn set(&self, key: &str, value: &str) -> Result<(), QueueError>;

    fn remove(&self, key: &str);

    fn keys(&self) -> Vec<String>;
}

/// In-memory store: the test double, and the degradation target when the
/// real persisted store is unusable.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), QueueError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries().remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }
}

/// Verify the store accepts writes: write a sentinel under the queue's
/// prefix, then delete it. Runs once at startup; a failing probe makes the
/// queue degrade to [`MemoryStore`].
pub fn probe(store: &dyn KeyValueStore, prefix: &str) -> bool {
    let key = format!("{prefix}__probe");
    match store.set(&key, "1") {
        Ok(()) => {
            store.remove(&key);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips_and_enumerates() {
        let store = MemoryStore::new();
        store.set("q.a", "1").unwrap();
        store.set("q.b", "2").unwrap();
        assert_eq!(store.get("q.a").as_deref(), Some("1"));
        assert_eq!(store.keys(), vec!["q.a".to_string(), "q.b".to_string()]);
        store.remove("q.a");
        assert!(store.get("q.a").is_none());
    }

    #[test]
    fn probe_leaves_no_sentinel_behind() {
        let store = MemoryStore::new();
        assert!(probe(&store, "q."));
        assert!(store.keys().is_empty());
    }
}
