//! The per-player mutable record and its access discipline.

use super::session::SessionWindow;
use crate::core::{EntityKey, Location, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Shared handle to a cached record.
///
/// Cloned into queue workers; the mutex is only held for synchronous
/// critical sections, never across an `.await`.
pub type SharedRecord = Arc<Mutex<PlayerRecord>>;

/// All accumulated data for one player.
///
/// The `online`, `accessed` and `clear_after_save` flags are runtime-only
/// cache state and are not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub uuid: EntityKey,
    pub name: String,
    pub nicknames: Vec<String>,
    /// Epoch ms of first appearance.
    pub registered: i64,
    pub last_seen: i64,
    pub login_count: u64,
    pub play_time_ms: i64,
    pub banned: bool,
    pub sessions: Vec<SessionWindow>,
    pub locations: Vec<Location>,

    /// True while the player has an active session.
    #[serde(skip)]
    pub online: bool,
    /// True while a queue worker holds this record for mutation or save.
    #[serde(skip)]
    accessed: bool,
    /// Hint: evict this record once the next save completes.
    #[serde(skip)]
    clear_after_save: bool,
}

impl PlayerRecord {
    pub fn new(uuid: EntityKey, name: impl Into<String>, registered: i64) -> Self {
        Self {
            uuid,
            name: name.into(),
            nicknames: Vec::new(),
            registered,
            last_seen: registered,
            login_count: 0,
            play_time_ms: 0,
            banned: false,
            sessions: Vec::new(),
            locations: Vec::new(),
            online: false,
            accessed: false,
            clear_after_save: false,
        }
    }

    /// Records a finished session and folds its length into the play time.
    pub fn add_session(&mut self, session: SessionWindow) {
        self.play_time_ms += session.length_ms();
        self.sessions.push(session);
    }

    /// Adds a nickname, deduplicated, and makes it the current name.
    pub fn add_nickname(&mut self, nickname: impl Into<String>) {
        let nickname = nickname.into();
        if !self.nicknames.contains(&nickname) {
            self.nicknames.push(nickname.clone());
        }
        self.name = nickname;
    }

    pub fn add_locations(&mut self, locations: impl IntoIterator<Item = Location>) {
        self.locations.extend(locations);
    }

    pub fn is_accessed(&self) -> bool {
        self.accessed
    }

    pub fn clear_after_save(&self) -> bool {
        self.clear_after_save
    }

    pub fn set_clear_after_save(&mut self, clear: bool) {
        self.clear_after_save = clear;
    }

    pub fn into_shared(self) -> SharedRecord {
        Arc::new(Mutex::new(self))
    }
}

/// Scoped hold on a record's `accessed` flag.
///
/// The flag is set when the guard is created and cleared when it is dropped,
/// on every exit path. Workers keep the guard alive for the whole time they
/// hold the record outside its mutex (serialization, storage I/O).
pub struct AccessGuard {
    record: SharedRecord,
}

impl AccessGuard {
    pub fn acquire(record: &SharedRecord) -> Result<Self> {
        record.lock()?.accessed = true;
        Ok(Self { record: Arc::clone(record) })
    }
}

impl Drop for AccessGuard {
    fn drop(&mut self) {
        if let Ok(mut data) = self.record.lock() {
            data.accessed = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record() -> PlayerRecord {
        PlayerRecord::new(Uuid::new_v4(), "Steve", 1_000)
    }

    #[test]
    fn session_length_accrues_into_play_time() {
        let mut data = record();
        data.add_session(SessionWindow::started_at(1_000).ended(61_000));
        data.add_session(SessionWindow::started_at(100_000).ended(160_000));
        assert_eq!(data.play_time_ms, 120_000);
        assert_eq!(data.sessions.len(), 2);
    }

    #[test]
    fn nicknames_are_deduplicated() {
        let mut data = record();
        data.add_nickname("Steve");
        data.add_nickname("Herobrine");
        data.add_nickname("Steve");
        assert_eq!(data.nicknames, vec!["Steve".to_string(), "Herobrine".to_string()]);
        assert_eq!(data.name, "Steve");
    }

    #[test]
    fn access_guard_clears_flag_on_drop() {
        let shared = record().into_shared();
        {
            let _guard = AccessGuard::acquire(&shared).unwrap();
            assert!(shared.lock().unwrap().is_accessed());
        }
        assert!(!shared.lock().unwrap().is_accessed());
    }

    #[test]
    fn access_guard_clears_flag_on_panic_path() {
        let shared = record().into_shared();
        let cloned = Arc::clone(&shared);
        let result = std::panic::catch_unwind(move || {
            let _guard = AccessGuard::acquire(&cloned).unwrap();
            panic!("worker died mid-save");
        });
        assert!(result.is_err());
        // The guard's drop ran during unwind and poisoned the mutex; the
        // flag it cleared is still observable.
        let data = shared.lock().unwrap_or_else(|e| e.into_inner());
        assert!(!data.is_accessed());
    }

    #[test]
    fn runtime_flags_do_not_round_trip() {
        let mut data = record();
        data.online = true;
        data.set_clear_after_save(true);
        let bytes = rmp_serde::to_vec(&data).unwrap();
        let loaded: PlayerRecord = rmp_serde::from_slice(&bytes).unwrap();
        assert!(!loaded.online);
        assert!(!loaded.clear_after_save());
        assert!(!loaded.is_accessed());
    }
}
