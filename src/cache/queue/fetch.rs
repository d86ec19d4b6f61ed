//! Fetch queue: resolves entity keys to records, loading from the store on a
//! cache miss.

use crate::cache::map::CacheMap;
use crate::core::EntityKey;
use crate::data::SharedRecord;
use crate::storage::Store;
use log::{debug, warn};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

struct FetchRequest {
    key: EntityKey,
    /// Insert the loaded record into the cache before replying.
    cache_result: bool,
    reply: oneshot::Sender<Option<SharedRecord>>,
}

/// Serial worker resolving `(key, reply)` requests against the store.
///
/// Requests already queued when the worker wakes are drained as one burst and
/// grouped by key, so several waiters racing for the same absent key cost a
/// single storage load and all receive the one record it produced.
pub struct FetchQueue {
    tx: mpsc::UnboundedSender<FetchRequest>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl FetchQueue {
    pub fn start(store: Arc<dyn Store>, cache: Arc<CacheMap>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(worker(rx, stop_rx, store, cache));
        Self {
            tx,
            stop_tx: Mutex::new(Some(stop_tx)),
            handle: tokio::sync::Mutex::new(Some(handle)),
        }
    }

    /// Schedules a load; the returned receiver resolves to the record, or
    /// `None` if the key has never existed or the load failed.
    pub fn schedule(
        &self,
        key: EntityKey,
        cache_result: bool,
    ) -> oneshot::Receiver<Option<SharedRecord>> {
        let (reply, receiver) = oneshot::channel();
        let request = FetchRequest { key, cache_result, reply };
        if self.tx.send(request).is_err() {
            debug!("{}: fetch queue already stopped, dropping request", key);
        }
        receiver
    }

    /// Finishes the request burst in hand, then stops pulling new ones.
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
    mut rx: mpsc::UnboundedReceiver<FetchRequest>,
    mut stop_rx: oneshot::Receiver<()>,
    store: Arc<dyn Store>,
    cache: Arc<CacheMap>,
) {
    loop {
        let first = tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            maybe = rx.recv() => match maybe {
                Some(request) => request,
                None => break,
            },
        };
        // Drain everything already queued so same-key requests coalesce.
        let mut burst = vec![first];
        while let Ok(request) = rx.try_recv() {
            burst.push(request);
        }

        // Group by key, preserving first-arrival order between keys.
        let mut groups: Vec<(EntityKey, Vec<FetchRequest>)> = Vec::new();
        for request in burst {
            match groups.iter_mut().find(|(key, _)| *key == request.key) {
                Some((_, waiters)) => waiters.push(request),
                None => groups.push((request.key, vec![request])),
            }
        }

        for (key, waiters) in groups {
            let resolved = resolve(key, &waiters, &store, &cache).await;
            for waiter in waiters {
                let _ = waiter.reply.send(resolved.clone());
            }
        }
    }
}

/// One load per key; the cache is re-checked first since the record may have
/// arrived between enqueue and processing.
async fn resolve(
    key: EntityKey,
    waiters: &[FetchRequest],
    store: &Arc<dyn Store>,
    cache: &Arc<CacheMap>,
) -> Option<SharedRecord> {
    if let Some(cached) = cache.get(key) {
        return Some(cached);
    }
    match store.load(key).await {
        Ok(Some(record)) => {
            debug!("{}: loaded from store", key);
            if waiters.iter().any(|w| w.cache_result) {
                Some(cache.cache(record))
            } else {
                Some(record.into_shared())
            }
        }
        Ok(None) => None,
        Err(e) => {
            warn!("{}: load failed, dropping fetch request: {}", key, e);
            None
        }
    }
}
