//! Codec for encoding and decoding Tandem events.
//!
//! Events travel as one JSON object per transport message. There is no
//! length prefix; the transport preserves message boundaries.

use bytes::Bytes;
use thiserror::Error;

use crate::events::{Event, EventKind, WireEvent};

/// Maximum encoded event size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Event exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Payload was empty.
    #[error("Empty frame")]
    Empty,

    /// Payload was not valid JSON, or had the wrong shape.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The `type` tag is not part of the protocol.
    #[error("Unknown event type: {0}")]
    UnknownKind(String),

    /// A field required by the event kind is absent.
    #[error("Missing field {field} in {kind} event")]
    MissingField {
        /// Kind of the incomplete event.
        kind: EventKind,
        /// Name of the missing field.
        field: &'static str,
    },
}

/// Encode an event to bytes.
///
/// # Errors
///
/// Returns an error if the encoded event exceeds [`MAX_FRAME_SIZE`].
pub fn encode(event: &Event) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(event)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// Decode an event from bytes.
///
/// # Errors
///
/// Returns an error if the data is empty, too large, not JSON, carries an
/// unknown `type` or lacks a field its kind requires.
pub fn decode(data: &[u8]) -> Result<Event, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::Empty);
    }

    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    let wire: WireEvent = serde_json::from_slice(data)?;
    Event::try_from(wire)
}
