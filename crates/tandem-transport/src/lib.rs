//! # tandem-transport
//!
//! Transport abstraction layer for the Tandem collaboration layer.
//!
//! This crate provides a uniform, split interface over bidirectional
//! message sessions:
//!
//! - **WebSocket** - An upgraded axum socket
//! - **Memory** - A channel-backed session for tests and benchmarks
//!
//! ## Transport Abstraction
//!
//! Every transport splits into a [`TransportReader`] and a
//! [`TransportWriter`], so the read loop and the write loop of a connection
//! can run as independent tasks.
//!
//! ```rust,ignore
//! use tandem_transport::{Transport, TransportReader};
//!
//! async fn drain(transport: impl Transport) {
//!     let (mut reader, _writer) = transport.split();
//!     while let Ok(Some(message)) = reader.recv().await {
//!         // Process message
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryPeer, MemoryTransport, Outgoing};
pub use traits::{
    ConnectionId, Incoming, Transport, TransportError, TransportReader, TransportWriter,
};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
