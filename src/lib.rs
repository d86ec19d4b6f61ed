// ============================================================================
// PlayerCache Library
// ============================================================================

//! Write-back in-memory cache for per-player session data.
//!
//! [`CacheHandler`] keeps one mutable [`PlayerRecord`] per active player and
//! persists them through four cooperating asynchronous queues (fetch,
//! process, save, clear) plus a periodic flush cycle, so game-event hooks
//! never block on storage.
//!
//! # Examples
//!
//! ```no_run
//! use playercache::{CacheConfig, CacheHandler, FileStore};
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! # async fn run() -> playercache::Result<()> {
//! let store = Arc::new(FileStore::open("plugin-data").await?);
//! let handler = CacheHandler::new(store, CacheConfig::default()).await?;
//!
//! let player = Uuid::new_v4();
//! handler.on_entity_activated(player, "Alex", false).await;
//! handler.handle_command("/spawn");
//! handler.on_entity_deactivated(player);
//!
//! // On plugin disable: drain queues, apply leftovers, persist, close.
//! handler.save_on_disable().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod core;
pub mod data;
pub mod storage;

// Re-export main types for convenience
pub use cache::{CacheHandler, CacheMap};
pub use config::CacheConfig;
pub use core::{CacheError, EntityKey, Location, Result, TpsSample};
pub use data::{ChangeEvent, ChangeKind, PlayerRecord, SessionWindow, SharedRecord};
pub use storage::{FileStore, Store};
