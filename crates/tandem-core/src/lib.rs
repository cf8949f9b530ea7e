//! # tandem-core
//!
//! Connections, document rooms and presence fan-out for the Tandem
//! collaboration server.
//!
//! - **Connection** - One live session with an inbound and an outbound pump
//! - **RoomRegistry** - Lock-guarded index of rooms; join/leave/cursor fan-out
//! - **Room** - Members of one document and their presence
//! - **auth** - The authenticator and access checker the server consumes
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  register   ┌──────────────┐  enqueue  ┌─────────────┐
//! │  Connection │────────────▶│ RoomRegistry │──────────▶│  Connection │
//! │  (inbound)  │ route_cursor└──────────────┘           │  (outbound) │
//! └─────────────┘                    │                   └─────────────┘
//!                                    ▼
//!                             ┌─────────────┐
//!                             │    Room     │
//!                             └─────────────┘
//! ```

pub mod auth;
pub mod connection;
pub mod presence;
pub mod registry;
pub mod room;

pub use auth::{AccessChecker, AccessError, AuthError, Authenticator, Identity};
pub use connection::{
    CloseReason, Connection, ConnectionConfig, ConnectionHandle, ConnectionState,
    ConnectionSummary,
};
pub use presence::PresenceState;
pub use registry::{RegistryStats, RoomRegistry};
pub use room::{validate_document_id, DocumentId, Room, MAX_DOCUMENT_ID_LENGTH};
