//! Rejection responses for the collaboration endpoint.
//!
//! Every rejection happens before the WebSocket upgrade and is returned as
//! a JSON body:
//!
//! ```json
//! { "code": "unauthorized", "message": "Credential expired" }
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tandem_core::{AccessError, AuthError};
use thiserror::Error;

/// Errors surfaced to the caller instead of an upgrade.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request parameters are invalid.
    #[error("{0}")]
    InvalidInput(String),

    /// No credential in the query, header or cookie.
    #[error("Missing credential")]
    MissingCredential,

    /// The authenticator rejected the credential.
    #[error(transparent)]
    Unauthenticated(#[from] AuthError),

    /// The identity may not join the document.
    #[error("{0}")]
    Forbidden(String),

    /// The document does not exist.
    #[error("{0}")]
    NotFound(String),

    /// A collaborator failed.
    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'static str,
    message: &'a str,
}

impl ApiError {
    /// HTTP status for this rejection.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingCredential | ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "invalid_input",
            ApiError::MissingCredential | ApiError::Unauthenticated(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Denied(_) => ApiError::Forbidden(err.to_string()),
            AccessError::NotFound(_) => ApiError::NotFound(err.to_string()),
            // Collaborator details stay in the logs.
            AccessError::Unavailable(_) => ApiError::Internal("Access check failed".to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let body = ErrorBody {
            code: self.code(),
            message: &message,
        };
        (self.status(), Json(body)).into_response()
    }
}
