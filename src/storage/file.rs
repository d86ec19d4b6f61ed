//! Directory-backed [`Store`]: one MessagePack file per player plus counter
//! and performance-sample files.

use super::Store;
use crate::core::{CacheError, EntityKey, Result, TpsSample};
use crate::data::PlayerRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

const PLAYERS_DIR: &str = "players";
// Counters are tiny and worth keeping human-inspectable; records are not.
const COMMAND_USE_FILE: &str = "commanduse.json";
const TPS_FILE: &str = "tps.bin";

pub struct FileStore {
    root: PathBuf,
    players_dir: PathBuf,
    closed: AtomicBool,
}

impl FileStore {
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let players_dir = root.join(PLAYERS_DIR);
        fs::create_dir_all(&players_dir)
            .await
            .map_err(|e| CacheError::Storage(format!("Failed to create store directory: {}", e)))?;
        Ok(Self { root, players_dir, closed: AtomicBool::new(false) })
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    fn player_path(&self, key: EntityKey) -> PathBuf {
        self.players_dir.join(format!("{}.bin", key))
    }

    /// Writes to a `.tmp` sibling and renames over the target so readers
    /// never observe a half-written file.
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, bytes)
            .await
            .map_err(|e| CacheError::Storage(format!("Failed to write {}: {}", temp_path.display(), e)))?;
        fs::rename(&temp_path, path)
            .await
            .map_err(|e| CacheError::Storage(format!("Failed to rename {}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Reads back every appended tps batch, in append order.
    pub async fn load_tps(&self) -> Result<Vec<TpsSample>> {
        self.check_open()?;
        let path = self.root.join(TPS_FILE);
        match fs::read(&path).await {
            Ok(bytes) => {
                let mut samples = Vec::new();
                let mut offset = 0;
                while offset + 4 <= bytes.len() {
                    let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
                    offset += 4;
                    let end = offset + len;
                    if end > bytes.len() {
                        // Truncated trailing entry, e.g. from a crash mid-append.
                        break;
                    }
                    let sample: TpsSample = rmp_serde::from_slice(&bytes[offset..end])?;
                    samples.push(sample);
                    offset = end;
                }
                Ok(samples)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(CacheError::Storage(format!("Failed to read tps file: {}", e))),
        }
    }
}

#[async_trait]
impl Store for FileStore {
    async fn load(&self, key: EntityKey) -> Result<Option<PlayerRecord>> {
        self.check_open()?;
        match fs::read(self.player_path(key)).await {
            Ok(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Storage(format!("Failed to load {}: {}", key, e))),
        }
    }

    async fn save(&self, record: &PlayerRecord) -> Result<()> {
        self.check_open()?;
        let bytes = rmp_serde::to_vec(record)?;
        self.write_atomic(&self.player_path(record.uuid), &bytes).await
    }

    async fn was_seen_before(&self, key: EntityKey) -> bool {
        !self.closed.load(Ordering::SeqCst) && fs::try_exists(self.player_path(key)).await.unwrap_or(false)
    }

    async fn load_command_use(&self) -> Result<HashMap<String, u64>> {
        self.check_open()?;
        match fs::read(self.root.join(COMMAND_USE_FILE)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| CacheError::Serialization(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(CacheError::Storage(format!("Failed to load command use: {}", e))),
        }
    }

    async fn save_command_use(&self, usage: HashMap<String, u64>) -> Result<()> {
        self.check_open()?;
        let bytes = serde_json::to_vec_pretty(&usage)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.write_atomic(&self.root.join(COMMAND_USE_FILE), &bytes).await
    }

    async fn save_tps(&self, samples: Vec<TpsSample>) -> Result<()> {
        self.check_open()?;
        if samples.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(TPS_FILE))
            .await
            .map_err(|e| CacheError::Storage(format!("Failed to open tps file: {}", e)))?;
        for sample in &samples {
            let payload = rmp_serde::to_vec(sample)?;
            let len = payload.len() as u32;
            file.write_all(&len.to_le_bytes())
                .await
                .map_err(|e| CacheError::Storage(format!("Failed to append tps: {}", e)))?;
            file.write_all(&payload)
                .await
                .map_err(|e| CacheError::Storage(format!("Failed to append tps: {}", e)))?;
        }
        file.flush()
            .await
            .map_err(|e| CacheError::Storage(format!("Failed to flush tps file: {}", e)))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
