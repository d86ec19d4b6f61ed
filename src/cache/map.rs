//! The shared cache map: entity key to record handle.

use crate::core::EntityKey;
use crate::data::{PlayerRecord, SharedRecord};
use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;

/// Map of cached records. Insertion and removal only happen through the
/// coordinator and the clear queue; workers get point-in-time snapshots for
/// batch operations instead of iterating the live map.
#[derive(Default)]
pub struct CacheMap {
    inner: Mutex<HashMap<EntityKey, SharedRecord>>,
}

impl CacheMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EntityKey, SharedRecord>> {
        // A poisoned map is still structurally intact; keep serving it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Inserts a record, replacing any cached one for the same key, and marks
    /// it online.
    pub fn cache(&self, mut record: PlayerRecord) -> SharedRecord {
        record.online = true;
        let key = record.uuid;
        let shared = record.into_shared();
        self.lock().insert(key, shared.clone());
        debug!("{}: added to cache", key);
        shared
    }

    pub fn get(&self, key: EntityKey) -> Option<SharedRecord> {
        self.lock().get(&key).cloned()
    }

    pub fn contains(&self, key: EntityKey) -> bool {
        self.lock().contains_key(&key)
    }

    pub fn remove(&self, key: EntityKey) -> Option<SharedRecord> {
        let removed = self.lock().remove(&key);
        if removed.is_some() {
            debug!("{}: removed from cache", key);
        }
        removed
    }

    /// Snapshot of every cached record handle.
    pub fn snapshot_values(&self) -> Vec<SharedRecord> {
        self.lock().values().cloned().collect()
    }

    /// Snapshot of every cached key.
    pub fn keys(&self) -> Vec<EntityKey> {
        self.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
