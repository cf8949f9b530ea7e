//! Transport abstraction traits for Tandem.
//!
//! A transport is one bidirectional message session. It is split into a
//! reading half and a writing half so the two directions can be driven by
//! independent tasks.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Counter mixed into generated IDs so two IDs minted in the same
/// nanosecond still differ.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation did not finish before its deadline.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A message read from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// An application payload (text or binary message).
    Data(Bytes),
    /// A keepalive ping from the peer.
    Ping,
    /// A keepalive acknowledgment from the peer.
    Pong,
}

/// The reading half of a transport.
#[async_trait]
pub trait TransportReader: Send + 'static {
    /// Receive the next message.
    ///
    /// Returns `Ok(None)` once the peer has closed the session cleanly.
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError>;
}

/// The writing half of a transport.
#[async_trait]
pub trait TransportWriter: Send + 'static {
    /// Write one application payload.
    async fn send(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Write a keepalive ping.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Write a close frame and shut the writing half down.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A bidirectional session that can be split into independent halves.
pub trait Transport: Send + 'static {
    /// Reading half.
    type Reader: TransportReader;
    /// Writing half.
    type Writer: TransportWriter;

    /// Split into reading and writing halves.
    fn split(self) -> (Self::Reader, Self::Writer);

    /// Transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}
