use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a cached entity (a player's UUID).
pub type EntityKey = Uuid;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A recorded world position for a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self { world: world.into(), x, y, z }
    }
}

/// One raw performance sample: server tick rate and player count at a moment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TpsSample {
    /// Epoch milliseconds of the measurement.
    pub date: i64,
    pub tps: f64,
    pub players: u32,
}

impl TpsSample {
    pub fn new(date: i64, tps: f64, players: u32) -> Self {
        Self { date, tps, players }
    }

    /// Collapses a minute bucket into a single averaged sample.
    ///
    /// Keeps the timestamp of the last raw sample in the bucket. The player
    /// count mean is rounded, not truncated. Returns `None` for an empty
    /// bucket.
    pub fn average_of(bucket: &[TpsSample]) -> Option<TpsSample> {
        let last = bucket.last()?;
        let n = bucket.len() as f64;
        let tps = bucket.iter().map(|s| s.tps).sum::<f64>() / n;
        let players = (bucket.iter().map(|s| s.players as f64).sum::<f64>() / n).round() as u32;
        Some(TpsSample { date: last.date, tps, players })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_keeps_last_timestamp_and_means_values() {
        let bucket = vec![
            TpsSample::new(0, 20.0, 7),
            TpsSample::new(30_000, 18.0, 8),
        ];
        let avg = TpsSample::average_of(&bucket).unwrap();
        assert_eq!(avg.date, 30_000);
        assert!((avg.tps - 19.0).abs() < f64::EPSILON);
        assert_eq!(avg.players, 8); // mean 7.5 rounds up
    }

    #[test]
    fn average_of_empty_bucket_is_none() {
        assert!(TpsSample::average_of(&[]).is_none());
    }
}
