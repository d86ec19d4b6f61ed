//! The cache coordinator and its work queues.
//!
//! [`CacheHandler`] owns the record map, the four queues (fetch, process,
//! save, clear), the command-usage counters, the performance-sample buffer
//! and the live-session registry, and drives the periodic and shutdown flush
//! protocols. It is constructed once per process lifetime and passed
//! explicitly to producers; there is no global instance.

pub mod flush;
pub mod map;
pub mod queue;

pub use map::CacheMap;

use crate::config::CacheConfig;
use crate::core::{CacheError, EntityKey, Location, Result, TpsSample, now_ms};
use crate::data::{AccessGuard, ChangeEvent, PlayerRecord, SessionWindow, SharedRecord};
use crate::storage::Store;
use flush::FlushHandle;
use log::{debug, error, warn};
use queue::{ClearQueue, FetchQueue, PendingKeys, ProcessQueue, SaveQueue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Live state of a currently-active entity, kept outside its record so the
/// flush driver can re-derive reload events and the shutdown pass can
/// synthesize final logouts.
#[derive(Debug, Clone)]
struct LiveSession {
    name: String,
    banned: bool,
    session: SessionWindow,
}

pub struct CacheHandler {
    store: Arc<dyn Store>,
    config: CacheConfig,
    cache: Arc<CacheMap>,

    /// Open sessions of currently-active entities.
    live: Mutex<HashMap<EntityKey, LiveSession>>,
    /// Command name to invocation count; flushed wholesale, never reset.
    command_use: Mutex<HashMap<String, u64>>,
    /// World positions buffered per player until the next explicit save.
    locations: Mutex<HashMap<EntityKey, Vec<Location>>>,
    /// Raw performance samples, one inner vec per minute bucket.
    tps_history: Mutex<Vec<Vec<TpsSample>>>,

    fetch: Arc<FetchQueue>,
    process: Arc<ProcessQueue>,
    save: Arc<SaveQueue>,
    clear: Arc<ClearQueue>,
    flush: tokio::sync::Mutex<Option<FlushHandle>>,

    /// Single-flight guard for the global save pass.
    saving: AtomicBool,
    /// Completed flush cycles; eviction runs every Kth.
    times_saved: AtomicU32,
    stopped: AtomicBool,
}

impl CacheHandler {
    /// Starts the queues and the periodic flush task.
    ///
    /// Loading the command-usage baseline is the one fatal startup step: a
    /// storage failure here is returned to the caller so the host can
    /// disable the whole component.
    pub async fn new(store: Arc<dyn Store>, config: CacheConfig) -> Result<Arc<Self>> {
        let command_use = store.load_command_use().await.map_err(|e| {
            error!("Failed to load command usage baseline: {}", e);
            e
        })?;

        let cache = Arc::new(CacheMap::new());
        let save_pending = Arc::new(PendingKeys::new());
        let process_pending = Arc::new(PendingKeys::new());
        let clear = Arc::new(ClearQueue::start(
            Arc::clone(&cache),
            Arc::clone(&save_pending),
            Arc::clone(&process_pending),
        ));
        let fetch = Arc::new(FetchQueue::start(Arc::clone(&store), Arc::clone(&cache)));
        let save = Arc::new(SaveQueue::start(
            Arc::clone(&store),
            Arc::clone(&clear),
            save_pending,
        ));
        let process = Arc::new(ProcessQueue::start(
            Arc::clone(&fetch),
            Arc::clone(&cache),
            process_pending,
        ));

        let handler = Arc::new(Self {
            store,
            config,
            cache,
            live: Mutex::new(HashMap::new()),
            command_use: Mutex::new(command_use),
            locations: Mutex::new(HashMap::new()),
            tps_history: Mutex::new(Vec::new()),
            fetch,
            process,
            save,
            clear,
            flush: tokio::sync::Mutex::new(None),
            saving: AtomicBool::new(false),
            times_saved: AtomicU32::new(0),
            stopped: AtomicBool::new(false),
        });
        let flush_handle = flush::start(Arc::clone(&handler), config);
        *handler.flush.lock().await = Some(flush_handle);
        Ok(handler)
    }

    // ========================================================================
    // Record access
    // ========================================================================

    /// Resolves a key to its record: cached hit immediately, otherwise
    /// through the fetch queue. With `cache_result` the loaded record is
    /// inserted into the cache before being handed back. `None` means the
    /// key has never existed.
    pub async fn get_for_processing(
        &self,
        key: EntityKey,
        cache_result: bool,
    ) -> Result<Option<SharedRecord>> {
        debug!("{}: get for processing, cache: {}", key, cache_result);
        if let Some(record) = self.cache.get(key) {
            return Ok(Some(record));
        }
        self.fetch
            .schedule(key, cache_result)
            .await
            .map_err(|_| CacheError::QueueClosed("fetch".to_string()))
    }

    /// Caches a record, replacing any existing one for the key, and marks it
    /// online.
    pub fn cache(&self, record: PlayerRecord) -> SharedRecord {
        self.cache.cache(record)
    }

    /// Caches a fresh record and schedules its first save.
    pub fn new_player(&self, record: PlayerRecord) -> SharedRecord {
        let shared = self.cache.cache(record);
        self.save.schedule(Arc::clone(&shared));
        shared
    }

    /// Appends a change-event to the process queue. `None` is a no-op.
    pub fn add_to_pool(&self, event: impl Into<Option<ChangeEvent>>) {
        let Some(event) = event.into() else { return };
        debug!("{}: adding to pool: {:?}", event.key, event.kind);
        self.process.add_to_pool(event);
    }

    /// True while the record is held by a worker or has queued save/process
    /// work. Observing a busy record cancels its pending eviction hint.
    pub fn is_data_accessed(&self, key: EntityKey) -> bool {
        let Some(record) = self.cache.get(key) else { return false };
        let accessed = record.lock().map(|d| d.is_accessed()).unwrap_or(false)
            || self.save.contains_key(key)
            || self.process.contains_key(key);
        if accessed {
            if let Ok(mut data) = record.lock() {
                data.set_clear_after_save(false);
            }
        }
        accessed
    }

    // ========================================================================
    // Saving & eviction
    // ========================================================================

    /// Submits a snapshot of the whole cache to the save queue as one batch.
    /// The returned receiver resolves once the batch has been written; an
    /// empty cache resolves immediately.
    pub fn save_all(&self) -> oneshot::Receiver<()> {
        self.save.schedule_batch(self.cache.snapshot_values())
    }

    /// Saves one record, folding in its buffered locations, and hints it for
    /// eviction once the save lands.
    pub async fn save_cached_data(&self, key: EntityKey) -> Result<()> {
        debug!("{}: save cached data", key);
        if let Some(record) = self.get_for_processing(key, true).await? {
            let buffered = self.take_locations(key);
            if let Ok(mut data) = record.lock() {
                data.add_locations(buffered);
                data.set_clear_after_save(true);
            }
            self.save.schedule(record);
        }
        Ok(())
    }

    /// Schedules every cached record for a clear pass.
    pub fn clear_all(&self) {
        self.clear.schedule_many(self.cache.keys());
    }

    /// Schedules one record for a clear pass.
    pub fn schedule_clear(&self, key: EntityKey) {
        self.clear.schedule(key);
    }

    // ========================================================================
    // Counters & performance samples
    // ========================================================================

    /// Counts one invocation of a command.
    pub fn handle_command(&self, command: &str) {
        let mut usage = self.command_use.lock().unwrap_or_else(|e| e.into_inner());
        *usage.entry(command.to_string()).or_insert(0) += 1;
    }

    /// Snapshot of the in-memory command-usage counters.
    pub fn command_use(&self) -> HashMap<String, u64> {
        self.command_use
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Flushes the counters to the store, wholesale. The in-memory map keeps
    /// accumulating across flushes.
    pub async fn save_command_use(&self) -> Result<()> {
        let snapshot = self.command_use();
        self.store.save_command_use(snapshot).await
    }

    /// Buffers a world position for a player. Buffered positions fold into
    /// the record at its next explicit save and at shutdown.
    pub fn add_location(&self, key: EntityKey, location: Location) {
        self.locations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key)
            .or_default()
            .push(location);
    }

    pub fn add_locations(&self, key: EntityKey, locations: impl IntoIterator<Item = Location>) {
        self.locations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key)
            .or_default()
            .extend(locations);
    }

    fn take_locations(&self, key: EntityKey) -> Vec<Location> {
        self.locations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key)
            .unwrap_or_default()
    }

    /// Appends one minute's worth of raw performance samples as a bucket.
    pub fn add_tps_last_minute(&self, history: Vec<TpsSample>) {
        if history.is_empty() {
            return;
        }
        self.tps_history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(history);
    }

    /// Collapses each buffered minute bucket into one averaged sample and
    /// hands the batch to the store. Processed buckets are removed and never
    /// reprocessed.
    pub async fn save_unsaved_tps_history(&self) -> Result<()> {
        let buckets = std::mem::take(
            &mut *self.tps_history.lock().unwrap_or_else(|e| e.into_inner()),
        );
        let averages: Vec<TpsSample> = buckets
            .iter()
            .filter_map(|bucket| TpsSample::average_of(bucket))
            .collect();
        if averages.is_empty() {
            return Ok(());
        }
        self.store.save_tps(averages).await
    }

    // ========================================================================
    // Sessions & producer hooks
    // ========================================================================

    /// Registers an open session for an entity that just became active.
    pub fn start_session(&self, key: EntityKey, name: &str, banned: bool) {
        self.start_session_at(key, name, banned, now_ms());
    }

    fn start_session_at(&self, key: EntityKey, name: &str, banned: bool, start: i64) {
        let live = LiveSession {
            name: name.to_string(),
            banned,
            session: SessionWindow::started_at(start),
        };
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, live);
    }

    pub fn active_keys(&self) -> Vec<EntityKey> {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }

    fn live_snapshot(&self) -> Vec<(EntityKey, LiveSession)> {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    /// Entity became active: open a session, create the record on first
    /// sight, and pool the login event.
    pub async fn on_entity_activated(&self, key: EntityKey, name: &str, banned: bool) {
        let now = now_ms();
        self.start_session_at(key, name, banned, now);
        if !self.store.was_seen_before(key).await && !self.cache.contains(key) {
            self.new_player(PlayerRecord::new(key, name, now));
        }
        self.add_to_pool(ChangeEvent::login(key, now, name, banned));
    }

    /// Entity went inactive: close its session and pool the logout event.
    pub fn on_entity_deactivated(&self, key: EntityKey) {
        let now = now_ms();
        let live = self
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
        if let Some(live) = live {
            self.add_to_pool(ChangeEvent::logout(
                key,
                now,
                Some(live.session.ended(now)),
                live.banned,
            ));
        }
    }

    /// Treats every active entity as a fresh login, e.g. after a host-level
    /// reload that replayed the activation hooks.
    pub async fn handle_reload(&self) {
        for (key, live) in self.live_snapshot() {
            let now = now_ms();
            if !self.store.was_seen_before(key).await && !self.cache.contains(key) {
                self.new_player(PlayerRecord::new(key, &live.name, now));
            }
            self.start_session_at(key, &live.name, live.banned, now);
            self.add_to_pool(ChangeEvent::reload(key, now, &live.name, live.banned));
        }
    }

    /// Re-derives each active entity's record from live state: applied
    /// directly when the record is cached, pooled otherwise.
    pub fn refresh_active_records(&self) {
        for (key, live) in self.live_snapshot() {
            let event = ChangeEvent::reload(key, now_ms(), &live.name, live.banned);
            match self.cache.get(key) {
                Some(record) => apply_direct(&record, &event),
                None => self.add_to_pool(event),
            }
        }
    }

    // ========================================================================
    // Flush cycle & shutdown
    // ========================================================================

    /// One periodic cycle: refresh active records, batch-save the cache,
    /// evict every Kth cycle, flush counters and samples. Single-flight: a
    /// cycle that fires while the previous one is still running is skipped.
    pub async fn run_flush_cycle(&self) {
        if self.saving.swap(true, Ordering::SeqCst) {
            debug!("flush cycle still running, skipping tick");
            return;
        }
        self.refresh_active_records();
        let batch_done = self.save_all();
        let cycles = self.times_saved.fetch_add(1, Ordering::SeqCst) + 1;
        if cycles % self.config.clear_after_saves() == 0 {
            self.clear_all();
        }
        if let Err(e) = self.save_command_use().await {
            warn!("Failed to save command usage: {}", e);
        }
        if let Err(e) = self.save_unsaved_tps_history().await {
            warn!("Failed to save tps history: {}", e);
        }
        // The pass stays open until the batch has actually been written;
        // releasing the guard earlier would let a store slower than the
        // period pile up duplicate batches.
        let _ = batch_done.await;
        self.saving.store(false, Ordering::SeqCst);
    }

    /// Completed flush cycles so far.
    pub fn times_saved(&self) -> u32 {
        self.times_saved.load(Ordering::SeqCst)
    }

    /// Shutdown flush: stop all periodic and queue work, drain leftovers,
    /// synthesize a final logout for every still-active entity, apply
    /// everything in timestamp order, persist the full cache plus counters
    /// and samples, and close the store last. Idempotent.
    pub async fn save_on_disable(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("save on disable: stopping queues");
        if let Some(flush_handle) = self.flush.lock().await.take() {
            flush_handle.cancel().await;
        }
        // The process queue goes down first: its in-flight event may still
        // need the fetch queue, and everything behind it comes back as
        // leftovers instead of racing a dying pipeline.
        let mut leftovers = self.process.stop_and_return_leftovers().await;
        self.save.stop().await;
        self.fetch.stop().await;
        self.clear.stop().await;

        // Every open session ends now; later events may depend on state from
        // earlier ones, so everything is applied in temporal order.
        let now = now_ms();
        let actives: Vec<(EntityKey, LiveSession)> = self
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (key, live) in actives {
            leftovers.push(ChangeEvent::logout(
                key,
                now,
                Some(live.session.ended(now)),
                live.banned,
            ));
        }
        leftovers.sort_by_key(|event| event.timestamp);
        debug!("save on disable: applying {} leftover events", leftovers.len());
        for event in leftovers {
            self.apply_now(event).await;
        }

        if let Err(e) = self.save_command_use().await {
            warn!("Failed to save command usage on disable: {}", e);
        }
        let buffered: Vec<(EntityKey, Vec<Location>)> = self
            .locations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (key, locations) in buffered {
            if let Some(record) = self.cache.get(key) {
                if let Ok(mut data) = record.lock() {
                    data.add_locations(locations);
                }
            }
        }
        let snapshot: Vec<PlayerRecord> = self
            .cache
            .snapshot_values()
            .iter()
            .filter_map(|record| record.lock().ok().map(|data| data.clone()))
            .collect();
        debug!("save on disable: persisting {} records", snapshot.len());
        for (key, outcome) in self.store.save_batch(snapshot).await {
            if let Err(e) = outcome {
                warn!("{}: final save failed: {}", key, e);
            }
        }
        if let Err(e) = self.save_unsaved_tps_history().await {
            warn!("Failed to save tps history on disable: {}", e);
        }
        self.store.close().await
    }

    /// Synchronous-path application used during shutdown, when the fetch
    /// queue is already stopped: loads uncached targets straight from the
    /// store.
    async fn apply_now(&self, event: ChangeEvent) {
        let record = match self.cache.get(event.key) {
            Some(record) => Some(record),
            None => match self.store.load(event.key).await {
                Ok(Some(data)) => Some(self.cache.cache(data)),
                Ok(None) => None,
                Err(e) => {
                    warn!("{}: load failed during shutdown: {}", event.key, e);
                    None
                }
            },
        };
        match record {
            Some(record) => apply_direct(&record, &event),
            None => warn!("{}: no record resolvable, dropping {:?}", event.key, event.kind),
        }
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    pub fn is_cached(&self, key: EntityKey) -> bool {
        self.cache.contains(key)
    }
}

fn apply_direct(record: &SharedRecord, event: &ChangeEvent) {
    match AccessGuard::acquire(record) {
        Ok(_guard) => {
            if let Ok(mut data) = record.lock() {
                event.apply(&mut data);
            }
        }
        Err(e) => warn!("{}: could not mark record accessed: {}", event.key, e),
    }
}
