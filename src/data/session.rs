use serde::{Deserialize, Serialize};

/// One play session: from activation to deactivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    /// Epoch milliseconds when the session started.
    pub start: i64,
    /// Epoch milliseconds when the session ended, `None` while still open.
    pub end: Option<i64>,
}

impl SessionWindow {
    pub fn started_at(start: i64) -> Self {
        Self { start, end: None }
    }

    pub fn ended(mut self, end: i64) -> Self {
        self.end = Some(end);
        self
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Session length in milliseconds; zero while the session is open or if
    /// the clock went backwards.
    pub fn length_ms(&self) -> i64 {
        match self.end {
            Some(end) => (end - self.start).max(0),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_is_zero_until_ended() {
        let open = SessionWindow::started_at(1_000);
        assert!(open.is_open());
        assert_eq!(open.length_ms(), 0);

        let closed = open.ended(4_500);
        assert!(!closed.is_open());
        assert_eq!(closed.length_ms(), 3_500);
    }

    #[test]
    fn backwards_clock_does_not_go_negative() {
        assert_eq!(SessionWindow::started_at(5_000).ended(1_000).length_ms(), 0);
    }
}
