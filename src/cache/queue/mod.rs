//! The four asynchronous work queues behind the cache coordinator.
//!
//! Each queue is a serial tokio worker draining an unbounded channel, with a
//! separate stop signal polled ahead of the channel so a stop request is
//! honored even while events are still queued. Stopping waits for the worker
//! to finish the item in hand; the process queue additionally hands back its
//! undrained events for synchronous shutdown processing.

pub mod clear;
pub mod fetch;
pub mod process;
pub mod save;

pub use clear::ClearQueue;
pub use fetch::FetchQueue;
pub use process::ProcessQueue;
pub use save::SaveQueue;

use crate::core::EntityKey;
use std::collections::HashMap;
use std::sync::Mutex;

/// Reference-counted set of keys a queue currently holds work for.
///
/// Backs the coordinator's busy check: a record must not be evicted while a
/// save or process task still points at it. Counted rather than flat so two
/// queued events for one key do not release the key after the first applies.
#[derive(Default)]
pub struct PendingKeys {
    counts: Mutex<HashMap<EntityKey, usize>>,
}

impl PendingKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: EntityKey) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        *counts.entry(key).or_insert(0) += 1;
    }

    pub fn remove(&self, key: EntityKey) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = counts.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&key);
            }
        }
    }

    pub fn contains(&self, key: EntityKey) -> bool {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn pending_keys_are_counted_not_flat() {
        let pending = PendingKeys::new();
        let key = Uuid::new_v4();
        pending.add(key);
        pending.add(key);
        pending.remove(key);
        assert!(pending.contains(key));
        pending.remove(key);
        assert!(!pending.contains(key));
    }

    #[test]
    fn remove_of_absent_key_is_a_no_op() {
        let pending = PendingKeys::new();
        pending.remove(Uuid::new_v4());
        assert!(!pending.contains(Uuid::new_v4()));
    }
}
