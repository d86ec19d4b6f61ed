//! Cache timing configuration.

use std::time::Duration;

/// Timing knobs for the periodic flush cycle.
///
/// Invalid values are clamped to safe defaults instead of failing: a
/// non-positive save interval falls back to 5 minutes, an eviction cadence
/// below 2 falls back to every 2nd cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    save_interval_minutes: i64,
    clear_after_saves: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            save_interval_minutes: 5,
            clear_after_saves: 2,
        }
    }
}

impl CacheConfig {
    pub fn new(save_interval_minutes: i64, clear_after_saves: i64) -> Self {
        Self::default()
            .with_save_interval_minutes(save_interval_minutes)
            .with_clear_after_saves(clear_after_saves)
    }

    pub fn with_save_interval_minutes(mut self, minutes: i64) -> Self {
        self.save_interval_minutes = if minutes <= 0 { 5 } else { minutes };
        self
    }

    pub fn with_clear_after_saves(mut self, saves: i64) -> Self {
        self.clear_after_saves = if saves <= 1 { 2 } else { saves as u32 };
        self
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_minutes as u64 * 60)
    }

    pub fn save_interval_minutes(&self) -> i64 {
        self.save_interval_minutes
    }

    /// How many flush cycles pass between eviction passes.
    pub fn clear_after_saves(&self) -> u32 {
        self.clear_after_saves
    }
}
