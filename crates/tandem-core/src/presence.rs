//! Presence tracking for Tandem.
//!
//! Each room member carries a presence record: who they are, when they
//! joined, and the last cursor position routed on their behalf.

use std::time::{SystemTime, UNIX_EPOCH};
use tandem_protocol::{Member, Position};
use tandem_transport::ConnectionId;

use crate::auth::Identity;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Presence state for a single connection.
#[derive(Debug, Clone)]
pub struct PresenceState {
    /// Connection ID.
    pub connection_id: ConnectionId,
    /// Identity of the connected user.
    pub identity: Identity,
    /// Last known cursor position.
    pub position: Option<Position>,
    /// Admission order within the room.
    pub join_seq: u64,
    /// When the user joined (ms since epoch).
    pub joined_at: u64,
    /// Last activity timestamp (ms since epoch).
    pub last_seen: u64,
}

impl PresenceState {
    /// Create a new presence state.
    #[must_use]
    pub fn new(connection_id: ConnectionId, identity: Identity, join_seq: u64) -> Self {
        let now = now_millis();

        Self {
            connection_id,
            identity,
            position: None,
            join_seq,
            joined_at: now,
            last_seen: now,
        }
    }

    /// Record a new cursor position.
    pub fn update_position(&mut self, position: Position) {
        self.position = Some(position);
        self.last_seen = now_millis();
    }

    /// Wire representation for a `presence` snapshot.
    #[must_use]
    pub fn to_member(&self) -> Member {
        Member {
            user_id: self.identity.user_id.clone(),
            label: self.identity.label.clone(),
            position: self.position.clone(),
        }
    }
}
