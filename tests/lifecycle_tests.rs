//! End-to-end lifecycle over the file-backed store
//!
//! A full activate / play / deactivate / disable round, then a fresh store
//! over the same directory to verify what actually landed on disk.

mod common;

use playercache::{CacheConfig, CacheHandler, FileStore, Store, TpsSample};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

#[tokio::test]
async fn disable_persists_everything_for_a_restart() {
    let dir = TempDir::new().unwrap();
    let key = Uuid::new_v4();

    {
        let store = Arc::new(FileStore::open(dir.path()).await.unwrap());
        let handler = CacheHandler::new(store, CacheConfig::default()).await.unwrap();

        handler.on_entity_activated(key, "Alex", false).await;
        handler.handle_command("/spawn");
        handler.handle_command("/spawn");
        handler.add_tps_last_minute(vec![
            TpsSample::new(0, 20.0, 1),
            TpsSample::new(30_000, 19.0, 1),
        ]);
        handler.on_entity_deactivated(key);

        handler.save_on_disable().await.unwrap();
    }

    // Fresh store over the same directory, as after a server restart.
    let store = FileStore::open(dir.path()).await.unwrap();
    let record = store.load(key).await.unwrap().expect("record on disk");
    assert_eq!(record.login_count, 1);
    assert_eq!(record.sessions.len(), 1);
    assert!(!record.sessions[0].is_open());
    assert!(store.was_seen_before(key).await);

    let usage = store.load_command_use().await.unwrap();
    assert_eq!(usage.get("/spawn"), Some(&2));

    let tps = store.load_tps().await.unwrap();
    assert_eq!(tps.len(), 1);
    assert_eq!(tps[0].date, 30_000);
    assert!((tps[0].tps - 19.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn restarted_cache_picks_up_persisted_counters() {
    let dir = TempDir::new().unwrap();

    {
        let store = Arc::new(FileStore::open(dir.path()).await.unwrap());
        let handler = CacheHandler::new(store, CacheConfig::default()).await.unwrap();
        handler.handle_command("/home");
        handler.save_on_disable().await.unwrap();
    }

    let store = Arc::new(FileStore::open(dir.path()).await.unwrap());
    let handler = CacheHandler::new(store, CacheConfig::default()).await.unwrap();
    handler.handle_command("/home");
    assert_eq!(handler.command_use().get("/home"), Some(&2));
    handler.save_on_disable().await.unwrap();
}
