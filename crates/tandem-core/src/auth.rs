//! Collaborator interfaces consumed by the entry point.
//!
//! Credential verification and document permissions live outside Tandem.
//! The server reaches them through these two traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A verified user identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user ID.
    pub user_id: String,
    /// Display label shown to other room members.
    pub label: String,
}

impl Identity {
    /// Create a new identity.
    #[must_use]
    pub fn new(user_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            label: label.into(),
        }
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Credential was rejected.
    #[error("Invalid credential: {0}")]
    Invalid(String),

    /// Credential was valid but has expired.
    #[error("Credential expired")]
    Expired,
}

/// Access check errors.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The user may not join this document.
    #[error("Access to document {0} denied")]
    Denied(String),

    /// The document does not exist.
    #[error("Document not found: {0}")]
    NotFound(String),

    /// The checker could not reach a decision.
    #[error("Access check unavailable: {0}")]
    Unavailable(String),
}

/// Maps an opaque credential to a verified identity.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify `credential`.
    async fn authenticate(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// Decides whether a verified identity may join a document's room.
#[async_trait]
pub trait AccessChecker: Send + Sync {
    /// `Ok(())` means the identity may join.
    async fn check_access(&self, identity: &Identity, document_id: &str)
        -> Result<(), AccessError>;
}
