//! # tandem-protocol
//!
//! Wire protocol definitions for the Tandem collaboration layer.
//!
//! This crate defines the JSON events exchanged between collaboration
//! clients and the server, and the codec that turns them into bytes.
//!
//! ## Event Types
//!
//! - `join` / `leave` - Room membership changes
//! - `cursor` - Opaque cursor position updates
//! - `presence` - Full member snapshot for a newly joined client
//!
//! ## Example
//!
//! ```rust
//! use tandem_protocol::{codec, Event, Position};
//!
//! let position = Position::from_json(r#"{"x":10,"y":20}"#).unwrap();
//! let event = Event::cursor("bob", position);
//!
//! let encoded = codec::encode(&event).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, encode, ProtocolError};
pub use events::{Event, EventKind, Member, Position};
