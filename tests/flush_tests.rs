//! Periodic flush cycle tests
//!
//! Eviction cadence, single-flight guarding and the refresh of active
//! entities, driven by calling `run_flush_cycle` directly for determinism.

mod common;

use common::{MockStore, wait_until};
use playercache::{CacheConfig, CacheHandler, PlayerRecord};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn eviction_waits_for_a_full_cadence() {
    let store = Arc::new(MockStore::new());
    let handler = CacheHandler::new(store.clone(), CacheConfig::new(5, 2))
        .await
        .unwrap();

    let key = Uuid::new_v4();
    let record = handler.cache(PlayerRecord::new(key, "Alex", 0));
    record.lock().unwrap().online = false;

    // Cycle 1: no eviction pass is scheduled at all.
    handler.run_flush_cycle().await;
    assert_eq!(handler.times_saved(), 1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(handler.is_cached(key));

    // Cycle 2 runs the eviction pass. A record still pinned by the save
    // batch is skipped and caught by a later cycle, so allow a few.
    let mut evicted = false;
    for _ in 0..4 {
        handler.run_flush_cycle().await;
        if wait_until(Duration::from_millis(500), || !handler.is_cached(key)).await {
            evicted = true;
            break;
        }
    }
    assert!(evicted);
}

#[tokio::test]
async fn overlapping_cycles_are_skipped() {
    let store = Arc::new(MockStore::new());
    // Slow counter flush keeps the first cycle in flight.
    store.set_delay(Duration::from_millis(200));
    let handler = CacheHandler::new(store.clone(), CacheConfig::default())
        .await
        .unwrap();

    let slow = {
        let handler = Arc::clone(&handler);
        tokio::spawn(async move { handler.run_flush_cycle().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    handler.run_flush_cycle().await; // fires mid-cycle, must be skipped
    slow.await.unwrap();

    assert_eq!(handler.times_saved(), 1);
}

#[tokio::test]
async fn save_pass_stays_open_until_the_batch_lands() {
    let store = Arc::new(MockStore::new());
    // A store slower than the tick: the batch write outlives the rest of
    // the cycle by a wide margin.
    store.set_save_delay(Duration::from_millis(200));
    let handler = CacheHandler::new(store.clone(), CacheConfig::default())
        .await
        .unwrap();

    let key = Uuid::new_v4();
    handler.cache(PlayerRecord::new(key, "Alex", 0));

    let slow = {
        let handler = Arc::clone(&handler);
        tokio::spawn(async move { handler.run_flush_cycle().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    handler.run_flush_cycle().await; // batch still in flight, must be skipped
    slow.await.unwrap();

    assert_eq!(handler.times_saved(), 1);
    assert_eq!(store.save_count(key), 1);
}

#[tokio::test]
async fn cycle_refreshes_active_entities_from_live_state() {
    let store = Arc::new(MockStore::new());
    let handler = CacheHandler::new(store.clone(), CacheConfig::default())
        .await
        .unwrap();

    let key = Uuid::new_v4();
    let record = handler.cache(PlayerRecord::new(key, "Alex", 0));
    handler.start_session(key, "AlexRenamed", true);

    handler.run_flush_cycle().await;

    let data = record.lock().unwrap();
    assert_eq!(data.name, "AlexRenamed");
    assert!(data.banned);
}

#[tokio::test]
async fn cycle_flushes_counters_and_samples() {
    let store = Arc::new(MockStore::new());
    let handler = CacheHandler::new(store.clone(), CacheConfig::default())
        .await
        .unwrap();

    handler.handle_command("/spawn");
    handler.add_tps_last_minute(vec![playercache::TpsSample::new(60_000, 20.0, 3)]);

    handler.run_flush_cycle().await;

    assert_eq!(store.command_use.lock().unwrap().get("/spawn"), Some(&1));
    assert_eq!(store.tps.lock().unwrap().len(), 1);
}
