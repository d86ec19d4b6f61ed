//! Persistence boundary for the cache.
//!
//! The cache core only talks to [`Store`]; everything behind it (directory
//! layout, database, wire format) is the implementation's business. All
//! operations are fallible; queue workers log failures and keep going rather
//! than letting them escape.

pub mod file;

use crate::core::{EntityKey, Result, TpsSample};
use crate::data::PlayerRecord;
use async_trait::async_trait;
use std::collections::HashMap;

pub use file::FileStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Loads the record for a key; `None` if the key was never seen.
    async fn load(&self, key: EntityKey) -> Result<Option<PlayerRecord>>;

    /// Persists one record snapshot.
    async fn save(&self, record: &PlayerRecord) -> Result<()>;

    /// Persists a batch, returning a per-record outcome. A failure for one
    /// record never aborts the rest of the batch.
    async fn save_batch(&self, records: Vec<PlayerRecord>) -> Vec<(EntityKey, Result<()>)> {
        let mut outcomes = Vec::with_capacity(records.len());
        for record in &records {
            outcomes.push((record.uuid, self.save(record).await));
        }
        outcomes
    }

    async fn was_seen_before(&self, key: EntityKey) -> bool;

    /// Loads the persisted command-usage counters; an empty map if none were
    /// ever saved.
    async fn load_command_use(&self) -> Result<HashMap<String, u64>>;

    /// Replaces the persisted command-usage counters wholesale.
    async fn save_command_use(&self, usage: HashMap<String, u64>) -> Result<()>;

    /// Appends a batch of averaged performance samples.
    async fn save_tps(&self, samples: Vec<TpsSample>) -> Result<()>;

    /// Closes the store; later operations fail with [`crate::CacheError::Closed`].
    async fn close(&self) -> Result<()>;
}
