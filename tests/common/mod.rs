//! In-memory `Store` double with failure injection and operation counting.
#![allow(dead_code)]

use async_trait::async_trait;
use playercache::core::{CacheError, EntityKey, Result, TpsSample};
use playercache::data::PlayerRecord;
use playercache::storage::Store;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct MockStore {
    pub records: Mutex<HashMap<EntityKey, PlayerRecord>>,
    pub command_use: Mutex<HashMap<String, u64>>,
    pub tps: Mutex<Vec<TpsSample>>,

    pub load_counts: Mutex<HashMap<EntityKey, usize>>,
    pub save_counts: Mutex<HashMap<EntityKey, usize>>,

    pub fail_loads: AtomicBool,
    pub fail_command_use_load: AtomicBool,
    pub fail_saves_for: Mutex<HashSet<EntityKey>>,
    /// Artificial latency for `load` and `save_command_use`.
    pub delay: Mutex<Option<Duration>>,
    /// Artificial latency for `save` only.
    pub save_delay: Mutex<Option<Duration>>,
    pub closed: AtomicBool,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, record: PlayerRecord) {
        self.records.lock().unwrap().insert(record.uuid, record);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn set_save_delay(&self, delay: Duration) {
        *self.save_delay.lock().unwrap() = Some(delay);
    }

    pub fn load_count(&self, key: EntityKey) -> usize {
        *self.load_counts.lock().unwrap().get(&key).unwrap_or(&0)
    }

    pub fn save_count(&self, key: EntityKey) -> usize {
        *self.save_counts.lock().unwrap().get(&key).unwrap_or(&0)
    }

    pub fn total_saves(&self) -> usize {
        self.save_counts.lock().unwrap().values().sum()
    }

    pub fn saved_record(&self, key: EntityKey) -> Option<PlayerRecord> {
        self.records.lock().unwrap().get(&key).cloned()
    }

    async fn maybe_delay(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Store for MockStore {
    async fn load(&self, key: EntityKey) -> Result<Option<PlayerRecord>> {
        self.maybe_delay().await;
        *self.load_counts.lock().unwrap().entry(key).or_insert(0) += 1;
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(CacheError::Storage("injected load failure".to_string()));
        }
        Ok(self.records.lock().unwrap().get(&key).cloned())
    }

    async fn save(&self, record: &PlayerRecord) -> Result<()> {
        let delay = *self.save_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::Closed);
        }
        *self.save_counts.lock().unwrap().entry(record.uuid).or_insert(0) += 1;
        if self.fail_saves_for.lock().unwrap().contains(&record.uuid) {
            return Err(CacheError::Storage("injected save failure".to_string()));
        }
        self.records.lock().unwrap().insert(record.uuid, record.clone());
        Ok(())
    }

    async fn was_seen_before(&self, key: EntityKey) -> bool {
        self.records.lock().unwrap().contains_key(&key)
    }

    async fn load_command_use(&self) -> Result<HashMap<String, u64>> {
        if self.fail_command_use_load.load(Ordering::SeqCst) {
            return Err(CacheError::Storage("injected counter load failure".to_string()));
        }
        Ok(self.command_use.lock().unwrap().clone())
    }

    async fn save_command_use(&self, usage: HashMap<String, u64>) -> Result<()> {
        self.maybe_delay().await;
        *self.command_use.lock().unwrap() = usage;
        Ok(())
    }

    async fn save_tps(&self, samples: Vec<TpsSample>) -> Result<()> {
        self.tps.lock().unwrap().extend(samples);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Polls until `check` passes or the timeout elapses.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
