//! Change-events: ordered, immutable mutation commands for records.

use super::record::PlayerRecord;
use super::session::SessionWindow;
use crate::core::EntityKey;

/// What a change-event does to its target record.
///
/// One variant per event kind, all dispatched through [`ChangeEvent::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    /// Player joined the server.
    Login { name: String, banned: bool },
    /// Player left; carries the session that just ended, if one was open.
    Logout { session: Option<SessionWindow>, banned: bool },
    /// Refresh of live state (display name, ban flag) without a session edge.
    Reload { name: String, banned: bool },
    /// Player was kicked; ends the session like a logout.
    Kick { session: Option<SessionWindow>, banned: bool },
}

/// An ordered, timestamped mutation bound to one entity key.
///
/// Immutable once enqueued; consumed exactly once by applying it to the
/// resolved record.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub key: EntityKey,
    /// Epoch ms when the underlying game event happened. Events for the same
    /// key are applied in this order.
    pub timestamp: i64,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(key: EntityKey, timestamp: i64, kind: ChangeKind) -> Self {
        Self { key, timestamp, kind }
    }

    pub fn login(key: EntityKey, timestamp: i64, name: impl Into<String>, banned: bool) -> Self {
        Self::new(key, timestamp, ChangeKind::Login { name: name.into(), banned })
    }

    pub fn logout(key: EntityKey, timestamp: i64, session: Option<SessionWindow>, banned: bool) -> Self {
        Self::new(key, timestamp, ChangeKind::Logout { session, banned })
    }

    pub fn reload(key: EntityKey, timestamp: i64, name: impl Into<String>, banned: bool) -> Self {
        Self::new(key, timestamp, ChangeKind::Reload { name: name.into(), banned })
    }

    pub fn kick(key: EntityKey, timestamp: i64, session: Option<SessionWindow>, banned: bool) -> Self {
        Self::new(key, timestamp, ChangeKind::Kick { session, banned })
    }

    /// Applies this event's mutation to the record.
    pub fn apply(&self, data: &mut PlayerRecord) {
        data.last_seen = data.last_seen.max(self.timestamp);
        match &self.kind {
            ChangeKind::Login { name, banned } => {
                data.login_count += 1;
                data.banned = *banned;
                data.add_nickname(name.clone());
                data.online = true;
            }
            ChangeKind::Logout { session, banned } | ChangeKind::Kick { session, banned } => {
                if let Some(session) = session {
                    data.add_session(*session);
                }
                data.banned = *banned;
                data.online = false;
            }
            ChangeKind::Reload { name, banned } => {
                data.banned = *banned;
                data.add_nickname(name.clone());
            }
        }
    }
}
