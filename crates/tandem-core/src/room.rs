//! Document rooms.
//!
//! A room is the set of live connections bound to one document. Rooms are
//! owned by the [`RoomRegistry`](crate::registry::RoomRegistry), which
//! creates them on first join and deletes them once empty.

use std::collections::HashMap;
use tandem_protocol::{Member, Position};
use tandem_transport::ConnectionId;
use tracing::debug;

use crate::connection::ConnectionHandle;
use crate::presence::PresenceState;

/// Maximum document ID length.
pub const MAX_DOCUMENT_ID_LENGTH: usize = 256;

/// A document identifier.
pub type DocumentId = String;

/// Validate a document ID.
///
/// # Errors
///
/// Returns an error message if the ID is empty, too long or not printable
/// ASCII.
pub fn validate_document_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("Document ID cannot be empty");
    }
    if id.len() > MAX_DOCUMENT_ID_LENGTH {
        return Err("Document ID too long");
    }
    if !id.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Document ID contains invalid characters");
    }
    Ok(())
}

#[derive(Debug)]
struct RoomMember {
    handle: ConnectionHandle,
    presence: PresenceState,
}

/// Live members of one document.
#[derive(Debug)]
pub struct Room {
    document_id: DocumentId,
    members: HashMap<ConnectionId, RoomMember>,
    next_seq: u64,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(document_id: impl Into<DocumentId>) -> Self {
        Self {
            document_id: document_id.into(),
            members: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Add a connection.
    ///
    /// Returns `true` if the connection was not already a member. Joining
    /// twice keeps the original presence record.
    pub fn join(&mut self, handle: ConnectionHandle) -> bool {
        if self.members.contains_key(handle.id()) {
            return false;
        }

        let presence = PresenceState::new(handle.id().clone(), handle.identity().clone(), self.next_seq);
        self.next_seq += 1;

        debug!(
            document = %self.document_id,
            connection = %handle.id(),
            user = %handle.identity().user_id,
            "Member joined room"
        );
        self.members.insert(handle.id().clone(), RoomMember { handle, presence });
        true
    }

    /// Remove a connection, returning its presence record.
    pub fn leave(&mut self, connection_id: &ConnectionId) -> Option<PresenceState> {
        let member = self.members.remove(connection_id)?;
        debug!(
            document = %self.document_id,
            connection = %connection_id,
            joined_at = member.presence.joined_at,
            last_seen = member.presence.last_seen,
            "Member left room"
        );
        Some(member.presence)
    }

    /// Record the latest cursor position for a member.
    ///
    /// Returns `false` if the connection is not a member.
    pub fn record_position(&mut self, connection_id: &ConnectionId, position: Position) -> bool {
        match self.members.get_mut(connection_id) {
            Some(member) => {
                member.presence.update_position(position);
                true
            }
            None => false,
        }
    }

    /// Handles of every member except `connection_id`.
    #[must_use]
    pub fn handles_except(&self, connection_id: &ConnectionId) -> Vec<ConnectionHandle> {
        self.members
            .iter()
            .filter(|(id, _)| *id != connection_id)
            .map(|(_, member)| member.handle.clone())
            .collect()
    }

    /// Presence snapshot of all members, in join order.
    #[must_use]
    pub fn presence_snapshot(&self) -> Vec<Member> {
        let mut states: Vec<&PresenceState> =
            self.members.values().map(|member| &member.presence).collect();
        states.sort_by_key(|state| state.join_seq);
        states.into_iter().map(PresenceState::to_member).collect()
    }
}
