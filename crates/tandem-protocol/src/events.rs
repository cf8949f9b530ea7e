//! Event types for the Tandem protocol.
//!
//! Events are the messages exchanged over a collaboration connection. Each
//! event is a JSON object tagged by its `type` field:
//!
//! ```text
//! { "type": "join",     "user_id": "...", "label": "..." }
//! { "type": "leave",    "user_id": "..." }
//! { "type": "cursor",   "user_id": "...", "position": <opaque> }
//! { "type": "presence", "users": [ { "user_id": "...", "label": "...", "position": <opaque> } ] }
//! ```
//!
//! Clients only ever send `cursor`, without `user_id`; the server stamps the
//! sender before fanning it out.

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use std::fmt;
use std::str::FromStr;

use crate::codec::ProtocolError;

/// Event kind identifiers.
///
/// This is the closed tag set of the protocol. Anything else is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Join,
    Leave,
    Cursor,
    Presence,
}

impl EventKind {
    /// The wire tag for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::Join => "join",
            EventKind::Leave => "leave",
            EventKind::Cursor => "cursor",
            EventKind::Presence => "presence",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ProtocolError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "join" => Ok(EventKind::Join),
            "leave" => Ok(EventKind::Leave),
            "cursor" => Ok(EventKind::Cursor),
            "presence" => Ok(EventKind::Presence),
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }
}

/// An opaque, application-defined cursor position.
///
/// The position is kept as the raw JSON text it arrived as and is written
/// back out unchanged. Equality compares that text.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(Box<RawValue>);

impl Position {
    /// Build a position from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not a single well-formed JSON value.
    pub fn from_json(json: impl Into<String>) -> Result<Self, ProtocolError> {
        Ok(Self(RawValue::from_string(json.into())?))
    }

    /// Build a position from a structured JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ProtocolError> {
        Self::from_json(serde_json::to_string(value)?)
    }

    /// The raw JSON text of this position.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.get()
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Position {}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Position").field(&self.as_str()).finish()
    }
}

/// One entry of a `presence` snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Member user ID.
    pub user_id: String,
    /// Display label.
    #[serde(default)]
    pub label: String,
    /// Last position routed for this member, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl Member {
    /// Create a member entry without a known position.
    #[must_use]
    pub fn new(user_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            label: label.into(),
            position: None,
        }
    }

    /// Attach a last-known position.
    #[must_use]
    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }
}

/// A protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A user joined the room.
    Join {
        /// Joining user.
        user_id: String,
        /// Display label of the joining user.
        label: String,
    },

    /// A user left the room.
    Leave {
        /// Leaving user.
        user_id: String,
    },

    /// A cursor update.
    Cursor {
        /// Sender. Absent on client-sent frames.
        user_id: Option<String>,
        /// Opaque position payload.
        position: Position,
    },

    /// Full member list of a room, sent to a newly joined member.
    Presence {
        /// Current members, including the recipient.
        users: Vec<Member>,
    },
}

impl Event {
    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Join { .. } => EventKind::Join,
            Event::Leave { .. } => EventKind::Leave,
            Event::Cursor { .. } => EventKind::Cursor,
            Event::Presence { .. } => EventKind::Presence,
        }
    }

    /// Create a new Join event.
    #[must_use]
    pub fn join(user_id: impl Into<String>, label: impl Into<String>) -> Self {
        Event::Join {
            user_id: user_id.into(),
            label: label.into(),
        }
    }

    /// Create a new Leave event.
    #[must_use]
    pub fn leave(user_id: impl Into<String>) -> Self {
        Event::Leave {
            user_id: user_id.into(),
        }
    }

    /// Create a server-side Cursor event stamped with its sender.
    #[must_use]
    pub fn cursor(user_id: impl Into<String>, position: Position) -> Self {
        Event::Cursor {
            user_id: Some(user_id.into()),
            position,
        }
    }

    /// Create a client-side Cursor event (no sender).
    #[must_use]
    pub fn client_cursor(position: Position) -> Self {
        Event::Cursor {
            user_id: None,
            position,
        }
    }

    /// Create a new Presence event.
    #[must_use]
    pub fn presence(users: Vec<Member>) -> Self {
        Event::Presence { users }
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.kind().as_str())?;
        match self {
            Event::Join { user_id, label } => {
                map.serialize_entry("user_id", user_id)?;
                map.serialize_entry("label", label)?;
            }
            Event::Leave { user_id } => {
                map.serialize_entry("user_id", user_id)?;
            }
            Event::Cursor { user_id, position } => {
                if let Some(user_id) = user_id {
                    map.serialize_entry("user_id", user_id)?;
                }
                map.serialize_entry("position", position)?;
            }
            Event::Presence { users } => {
                map.serialize_entry("users", users)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireEvent::deserialize(deserializer)?;
        Event::try_from(wire).map_err(D::Error::custom)
    }
}

/// Flat on-the-wire shape of every event.
///
/// Raw positions cannot pass through serde's internally tagged enum
/// buffering, so events are read into this struct first and validated per
/// kind afterwards.
#[derive(Debug, Deserialize)]
pub(crate) struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default, deserialize_with = "present")]
    position: Option<Position>,
    #[serde(default)]
    users: Option<Vec<Member>>,
}

/// A key that is present yields `Some`, even when its value is `null`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Position>, D::Error> {
    Position::deserialize(deserializer).map(Some)
}

impl TryFrom<WireEvent> for Event {
    type Error = ProtocolError;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        let kind: EventKind = wire.kind.parse()?;
        let missing = |field: &'static str| ProtocolError::MissingField { kind, field };

        let event = match kind {
            EventKind::Join => Event::Join {
                user_id: wire.user_id.ok_or_else(|| missing("user_id"))?,
                label: wire.label.unwrap_or_default(),
            },
            EventKind::Leave => Event::Leave {
                user_id: wire.user_id.ok_or_else(|| missing("user_id"))?,
            },
            EventKind::Cursor => Event::Cursor {
                user_id: wire.user_id,
                position: wire.position.ok_or_else(|| missing("position"))?,
            },
            EventKind::Presence => Event::Presence {
                users: wire.users.ok_or_else(|| missing("users"))?,
            },
        };
        Ok(event)
    }
}
