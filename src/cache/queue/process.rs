//! Process queue: applies change-events to records, in enqueue order.

use super::{FetchQueue, PendingKeys};
use crate::cache::map::CacheMap;
use crate::core::EntityKey;
use crate::data::{AccessGuard, ChangeEvent, SharedRecord};
use log::{debug, warn};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Serial worker draining change-events one at a time.
///
/// A single worker gives FIFO application per key for free. An event whose
/// target cannot be resolved is logged and dropped; one missed update is
/// tolerated, a stalled pipeline is not.
pub struct ProcessQueue {
    tx: mpsc::UnboundedSender<ChangeEvent>,
    pending: Arc<PendingKeys>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    leftovers_rx: Mutex<Option<oneshot::Receiver<Vec<ChangeEvent>>>>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ProcessQueue {
    pub fn start(fetch: Arc<FetchQueue>, cache: Arc<CacheMap>, pending: Arc<PendingKeys>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let (leftovers_tx, leftovers_rx) = oneshot::channel();
        let handle = tokio::spawn(worker(
            rx,
            stop_rx,
            leftovers_tx,
            fetch,
            cache,
            Arc::clone(&pending),
        ));
        Self {
            tx,
            pending,
            stop_tx: Mutex::new(Some(stop_tx)),
            leftovers_rx: Mutex::new(Some(leftovers_rx)),
            handle: tokio::sync::Mutex::new(Some(handle)),
        }
    }

    pub fn add_to_pool(&self, event: ChangeEvent) {
        let key = event.key;
        // The send happens under the stop slot's lock, so it is atomic with
        // shutdown taking the slot: every accepted event is in the channel
        // before the stop signal fires and is either applied or handed back
        // as a leftover, never silently lost.
        let stop_slot = self.stop_tx.lock().unwrap_or_else(|e| e.into_inner());
        if stop_slot.is_none() {
            debug!("{}: process queue stopping, refusing event", key);
            return;
        }
        self.pending.add(key);
        if self.tx.send(event).is_err() {
            self.pending.remove(key);
            debug!("{}: process queue already stopped, dropping event", key);
        }
    }

    /// True while an event for this key is queued or being applied.
    pub fn contains_key(&self, key: EntityKey) -> bool {
        self.pending.contains(key)
    }

    /// Finishes the event in hand, then returns everything still queued so
    /// the coordinator can process it synchronously before exit.
    pub async fn stop_and_return_leftovers(&self) -> Vec<ChangeEvent> {
        let stop_tx = self.stop_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
        let leftovers_rx = self
            .leftovers_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match leftovers_rx {
            Some(rx) => rx.await.unwrap_or_default(),
            None => Vec::new(),
        }
    }
}

async fn worker(
    mut rx: mpsc::UnboundedReceiver<ChangeEvent>,
    mut stop_rx: oneshot::Receiver<()>,
    leftovers_tx: oneshot::Sender<Vec<ChangeEvent>>,
    fetch: Arc<FetchQueue>,
    cache: Arc<CacheMap>,
    pending: Arc<PendingKeys>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            maybe = rx.recv() => match maybe {
                Some(event) => event,
                None => break,
            },
        };
        let key = event.key;
        apply_event(event, &fetch, &cache).await;
        pending.remove(key);
    }
    // Hand back whatever was still queued; the keys no longer count as
    // pending here since the coordinator now owns them.
    let mut leftovers = Vec::new();
    while let Ok(event) = rx.try_recv() {
        pending.remove(event.key);
        leftovers.push(event);
    }
    let _ = leftovers_tx.send(leftovers);
}

async fn apply_event(event: ChangeEvent, fetch: &Arc<FetchQueue>, cache: &Arc<CacheMap>) {
    let record: Option<SharedRecord> = match cache.get(event.key) {
        Some(record) => Some(record),
        // Cache miss: load and cache through the fetch queue.
        None => fetch.schedule(event.key, true).await.unwrap_or(None),
    };
    let Some(record) = record else {
        warn!("{}: no record resolvable, dropping {:?}", event.key, event.kind);
        return;
    };
    match AccessGuard::acquire(&record) {
        Ok(_guard) => {
            if let Ok(mut data) = record.lock() {
                event.apply(&mut data);
            }
        }
        Err(e) => warn!("{}: could not mark record accessed: {}", event.key, e),
    }
}
