//! Dual-pool request store.
//!
//! Two tiers: a **live pool** (full-fidelity requests, including completion
//! hooks and local to this process) and a **persisted pool** (serializable
//! snapshots behind the key-value port, surviving restarts). The persisted
//! pool is the source of truth for *existence*; the live pool only adds
//! runtime fidelity on top. All mutation of persisted state goes through this
//! type.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::domain::{QueueError, Request, RequestId};
use crate::ports::KeyValueStore;

/// Caller-supplied completion hooks. Live-pool only: hooks never survive a
/// restart, and requests resolved from the persisted pool come back without
/// them.
#[derive(Clone, Default)]
pub struct CompletionHooks {
    pub on_success: Option<Arc<dyn Fn(&Value) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&Value) + Send + Sync>>,
}

impl CompletionHooks {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Runtime projection of a request: persistable snapshot plus hooks.
struct LiveRequest {
    snapshot: Request,
    hooks: CompletionHooks,
}

pub struct DualPoolStore {
    live: HashMap<RequestId, LiveRequest>,
    kv: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl DualPoolStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            live: HashMap::new(),
            kv,
            prefix: prefix.into(),
        }
    }

    fn key(&self, id: &RequestId) -> String {
        format!("{}{}", self.prefix, id)
    }

    fn persist(&self, request: &Request) -> Result<(), QueueError> {
        let json = serde_json::to_string(request)
            .map_err(|e| QueueError::Storage(format!("serialize request: {e}")))?;
        self.kv.set(&self.key(&request.id), &json)
    }

    /// Submission path: the only place live-pool entries are created.
    pub fn insert(&mut self, request: Request, hooks: CompletionHooks) -> Result<(), QueueError> {
        self.persist(&request)?;
        self.live
            .insert(request.id.clone(), LiveRequest { snapshot: request, hooks });
        Ok(())
    }

    /// Write the persisted snapshot. The live entry is refreshed only when
    /// one already exists: a request first seen through the persisted pool
    /// (written by another instance, or pruned here) keeps producing an
    /// ephemeral, hook-less runtime view on the next read.
    pub fn put(&mut self, request: &Request) -> Result<(), QueueError> {
        if let Some(entry) = self.live.get_mut(&request.id) {
            entry.snapshot = request.clone();
        }
        self.persist(request)
    }

    /// Live entry first (full fidelity); otherwise deserialize the persisted
    /// snapshot, hook-less. `None` when absent from both or unreadable.
    pub fn get(&self, id: &RequestId) -> Option<(Request, CompletionHooks)> {
        if let Some(entry) = self.live.get(id) {
            return Some((entry.snapshot.clone(), entry.hooks.clone()));
        }
        let raw = self.kv.get(&self.key(id))?;
        match serde_json::from_str::<Request>(&raw) {
            Ok(request) => Some((request, CompletionHooks::none())),
            Err(e) => {
                warn!(id = %id, error = %e, "skipping unreadable persisted request");
                None
            }
        }
    }

    /// Union of identifiers across both pools, in stable order. A live entry
    /// whose persisted counterpart is gone was completed by another instance
    /// sharing the store; it is pruned here.
    pub fn ids(&mut self) -> Vec<RequestId> {
        let persisted: HashSet<RequestId> = self
            .kv
            .keys()
            .into_iter()
            .filter_map(|key| {
                key.strip_prefix(&self.prefix)
                    .and_then(|raw| RequestId::parse(raw).ok())
            })
            .collect();

        self.live.retain(|id, _| persisted.contains(id));

        let mut ids: Vec<RequestId> = persisted.into_iter().collect();
        ids.sort();
        ids
    }

    /// Delete from both pools. The BUSY no-op guard lives in the queue layer,
    /// which always re-resolves the canonical request first.
    pub fn remove_entry(&mut self, id: &RequestId) {
        self.live.remove(id);
        self.kv.remove(&self.key(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Method, Operation, RequestMeta, RequestStatus};
    use crate::ports::MemoryStore;

    const ID: &str = "00112233-4455-6677-8899-aabbccddeeff";

    fn sample(id: &str) -> Request {
        Request::new(
            RequestId::parse(id).unwrap(),
            Operation::new(Method::Create, "/api/items"),
            1_000,
            Some(3),
            RequestMeta::default(),
        )
    }

    fn store_pair() -> (Arc<MemoryStore>, DualPoolStore) {
        let kv = Arc::new(MemoryStore::new());
        let store = DualPoolStore::new(kv.clone() as Arc<dyn KeyValueStore>, "requeue.");
        (kv, store)
    }

    #[test]
    fn insert_populates_both_pools() {
        let (kv, mut store) = store_pair();
        store.insert(sample(ID), CompletionHooks::none()).unwrap();

        assert!(store.live.contains_key(&RequestId::parse(ID).unwrap()));
        assert!(kv.get(&format!("requeue.{ID}")).is_some());
        assert_eq!(store.ids().len(), 1);
    }

    #[test]
    fn put_never_creates_live_entries() {
        let (_, mut store) = store_pair();
        let request = sample(ID);
        store.put(&request).unwrap();

        assert!(!store.live.contains_key(&request.id));
        // Still resolvable through the persisted pool, hook-less.
        let (resolved, hooks) = store.get(&request.id).unwrap();
        assert_eq!(resolved, request);
        assert!(hooks.on_success.is_none() && hooks.on_error.is_none());
    }

    #[test]
    fn put_refreshes_existing_live_snapshots() {
        let (_, mut store) = store_pair();
        store.insert(sample(ID), CompletionHooks::none()).unwrap();

        let mut updated = sample(ID);
        updated.mark_busy(2_000);
        store.put(&updated).unwrap();

        let (resolved, _) = store.get(&updated.id).unwrap();
        assert_eq!(resolved.status, RequestStatus::Busy);
        assert_eq!(resolved.last_attempt_at, 2_000);
    }

    #[test]
    fn persisted_only_requests_resolve_without_hooks() {
        let (kv, store) = store_pair();
        let request = sample(ID);
        kv.set(
            &format!("requeue.{ID}"),
            &serde_json::to_string(&request).unwrap(),
        )
        .unwrap();

        let (resolved, hooks) = store.get(&request.id).unwrap();
        assert_eq!(resolved, request);
        assert!(hooks.on_success.is_none() && hooks.on_error.is_none());
    }

    #[test]
    fn enumerate_prunes_live_entries_deleted_externally() {
        let (kv, mut store) = store_pair();
        store.insert(sample(ID), CompletionHooks::none()).unwrap();

        // Another instance sharing the store completed the request.
        kv.remove(&format!("requeue.{ID}"));

        assert!(store.ids().is_empty());
        assert!(store.get(&RequestId::parse(ID).unwrap()).is_none());
    }

    #[test]
    fn corrupt_persisted_snapshots_are_skipped() {
        let (kv, mut store) = store_pair();
        kv.set(&format!("requeue.{ID}"), "not json").unwrap();

        // The id enumerates (it exists), but resolution skips it silently.
        assert_eq!(store.ids().len(), 1);
        assert!(store.get(&RequestId::parse(ID).unwrap()).is_none());
    }

    #[test]
    fn foreign_keys_are_ignored_by_enumeration() {
        let (kv, mut store) = store_pair();
        kv.set("someone-elses-key", "x").unwrap();
        kv.set("requeue.not-a-guid", "x").unwrap();
        assert!(store.ids().is_empty());
    }

    #[test]
    fn remove_entry_deletes_from_both_pools() {
        let (kv, mut store) = store_pair();
        store.insert(sample(ID), CompletionHooks::none()).unwrap();

        store.remove_entry(&RequestId::parse(ID).unwrap());
        assert!(store.live.is_empty());
        assert!(kv.get(&format!("requeue.{ID}")).is_none());
    }
}
