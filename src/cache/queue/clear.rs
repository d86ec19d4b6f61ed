//! Clear queue: evicts idle records from the cache.

use super::PendingKeys;
use crate::cache::map::CacheMap;
use crate::core::EntityKey;
use log::debug;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

enum ClearTask {
    One(EntityKey),
    Many(Vec<EntityKey>),
}

/// Serial worker removing records whose entities are no longer active.
///
/// An online entity is never evicted: its clear-after-save hint is dropped
/// and the record stays cached. A record still held by the save or process
/// queue is likewise skipped rather than treated as an error.
pub struct ClearQueue {
    tx: mpsc::UnboundedSender<ClearTask>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ClearQueue {
    pub fn start(
        cache: Arc<CacheMap>,
        save_pending: Arc<PendingKeys>,
        process_pending: Arc<PendingKeys>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(worker(rx, stop_rx, cache, save_pending, process_pending));
        Self {
            tx,
            stop_tx: Mutex::new(Some(stop_tx)),
            handle: tokio::sync::Mutex::new(Some(handle)),
        }
    }

    pub fn schedule(&self, key: EntityKey) {
        if self.tx.send(ClearTask::One(key)).is_err() {
            debug!("{}: clear queue already stopped", key);
        }
    }

    pub fn schedule_many(&self, keys: Vec<EntityKey>) {
        if keys.is_empty() {
            return;
        }
        let _ = self.tx.send(ClearTask::Many(keys));
    }

    /// Finishes the task in hand, then stops pulling new ones.
    pub async fn stop(&self) {
        let stop_tx = self.stop_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}

async fn worker(
    mut rx: mpsc::UnboundedReceiver<ClearTask>,
    mut stop_rx: oneshot::Receiver<()>,
    cache: Arc<CacheMap>,
    save_pending: Arc<PendingKeys>,
    process_pending: Arc<PendingKeys>,
) {
    loop {
        let task = tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            maybe = rx.recv() => match maybe {
                Some(task) => task,
                None => break,
            },
        };
        match task {
            ClearTask::One(key) => clear_one(key, &cache, &save_pending, &process_pending),
            ClearTask::Many(keys) => {
                for key in keys {
                    clear_one(key, &cache, &save_pending, &process_pending);
                }
            }
        }
    }
}

fn clear_one(
    key: EntityKey,
    cache: &CacheMap,
    save_pending: &PendingKeys,
    process_pending: &PendingKeys,
) {
    let Some(record) = cache.get(key) else { return };
    let evict = match record.lock() {
        Ok(mut data) => {
            let busy =
                data.is_accessed() || save_pending.contains(key) || process_pending.contains(key);
            if data.online || busy {
                data.set_clear_after_save(false);
                debug!("{}: online or in use, did not clear", key);
                false
            } else {
                true
            }
        }
        // A poisoned record is left cached rather than half-evicted.
        Err(_) => false,
    };
    if evict {
        cache.remove(key);
    }
}
