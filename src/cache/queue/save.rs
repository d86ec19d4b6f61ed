//! Save queue: write-back persistence of records, batched.

use super::{ClearQueue, PendingKeys};
use crate::core::EntityKey;
use crate::data::{AccessGuard, SharedRecord};
use crate::storage::Store;
use log::{debug, warn};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

enum SaveTask {
    Single(SharedRecord),
    Batch(Vec<SharedRecord>, oneshot::Sender<()>),
}

/// Serial worker serializing records to the store.
///
/// Each record is held under its access flag for the duration of the write;
/// a failed write is logged and never aborts the rest of the batch. After a
/// successful save a record still hinted clear-after-save (and no longer
/// online) is handed to the clear queue.
pub struct SaveQueue {
    tx: mpsc::UnboundedSender<SaveTask>,
    pending: Arc<PendingKeys>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SaveQueue {
    pub fn start(store: Arc<dyn Store>, clear: Arc<ClearQueue>, pending: Arc<PendingKeys>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(worker(rx, stop_rx, store, clear, Arc::clone(&pending)));
        Self {
            tx,
            pending,
            stop_tx: Mutex::new(Some(stop_tx)),
            handle: tokio::sync::Mutex::new(Some(handle)),
        }
    }

    pub fn schedule(&self, record: SharedRecord) {
        let Some(key) = key_of(&record) else { return };
        self.pending.add(key);
        if self.tx.send(SaveTask::Single(record)).is_err() {
            self.pending.remove(key);
            debug!("{}: save queue already stopped, dropping save", key);
        }
    }

    /// Submits a point-in-time snapshot of the cache as one batch. The
    /// returned receiver resolves once every record in the batch has been
    /// written, so a caller can hold its save pass open until the work has
    /// actually landed. An empty batch resolves immediately; a batch dropped
    /// because the queue stopped resolves with an error.
    pub fn schedule_batch(&self, records: Vec<SharedRecord>) -> oneshot::Receiver<()> {
        let (done_tx, done_rx) = oneshot::channel();
        if records.is_empty() {
            let _ = done_tx.send(());
            return done_rx;
        }
        let keys: Vec<EntityKey> = records.iter().filter_map(key_of).collect();
        for key in &keys {
            self.pending.add(*key);
        }
        if self.tx.send(SaveTask::Batch(records, done_tx)).is_err() {
            for key in keys {
                self.pending.remove(key);
            }
            debug!("save queue already stopped, dropping batch");
        }
        done_rx
    }

    /// True while a save for this key is queued or in flight.
    pub fn contains_key(&self, key: EntityKey) -> bool {
        self.pending.contains(key)
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

fn key_of(record: &SharedRecord) -> Option<EntityKey> {
    record.lock().ok().map(|data| data.uuid)
}

async fn worker(
    mut rx: mpsc::UnboundedReceiver<SaveTask>,
    mut stop_rx: oneshot::Receiver<()>,
    store: Arc<dyn Store>,
    clear: Arc<ClearQueue>,
    pending: Arc<PendingKeys>,
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
            SaveTask::Single(record) => save_one(record, &store, &clear, &pending).await,
            SaveTask::Batch(records, done) => {
                for record in records {
                    save_one(record, &store, &clear, &pending).await;
                }
                let _ = done.send(());
            }
        }
    }
    // Undrained tasks no longer count as pending work; dropping a batch's
    // ack sender wakes its waiter with an error.
    while let Ok(task) = rx.try_recv() {
        let records = match task {
            SaveTask::Single(record) => vec![record],
            SaveTask::Batch(records, _done) => records,
        };
        for record in records {
            if let Some(key) = key_of(&record) {
                pending.remove(key);
            }
        }
    }
}

async fn save_one(
    record: SharedRecord,
    store: &Arc<dyn Store>,
    clear: &Arc<ClearQueue>,
    pending: &Arc<PendingKeys>,
) {
    let Some(key) = key_of(&record) else { return };
    let saved = match AccessGuard::acquire(&record) {
        Ok(_guard) => {
            // Snapshot under the lock, write outside it. The access flag
            // stays up until the guard drops after the write.
            let snapshot = record.lock().ok().map(|data| data.clone());
            match snapshot {
                Some(snapshot) => match store.save(&snapshot).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("{}: save failed: {}", key, e);
                        false
                    }
                },
                None => false,
            }
        }
        Err(e) => {
            warn!("{}: could not mark record accessed for save: {}", key, e);
            false
        }
    };
    pending.remove(key);
    if saved {
        let forward = record
            .lock()
            .map(|data| data.clear_after_save() && !data.online)
            .unwrap_or(false);
        if forward {
            clear.schedule(key);
        }
    }
}
