//! Periodic flush driver: the repeating save/evict cycle.

use super::CacheHandler;
use crate::config::CacheConfig;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

/// Handle to the running flush task; cancelling waits for the task to wind
/// down so no cycle is cut off mid-save.
pub struct FlushHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl FlushHandle {
    pub async fn cancel(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

/// Spawns the repeating cycle. The first fire happens one full period after
/// start, never immediately.
pub fn start(handler: Arc<CacheHandler>, config: CacheConfig) -> FlushHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let period = config.save_interval();
    let handle = tokio::spawn(async move {
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = timer.tick() => handler.run_flush_cycle().await,
            }
        }
    });
    FlushHandle { shutdown, handle }
}
