//! Error types for the coordination layer
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Store Error Enum ==
/// Failure reported by a key-value store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store cannot be reached or timed out
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Store answered but rejected the command
    #[error("Store error: {0}")]
    Backend(String),

    /// Key or value outside the accepted limits
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// Every slot holds a live record that must not be evicted
    #[error("Store full: {0}")]
    CapacityExceeded(String),
}

// == Error Enum ==
/// Unified error type for the coordination components and the HTTP surface.
#[derive(Error, Debug)]
pub enum Error {
    /// Shared store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Caller-supplied computation failed; never cached
    #[error("Compute failed: {0}")]
    Compute(#[source] anyhow::Error),

    /// Payload could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidArgument(String),

    /// Key not found in store
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Lock is held by another caller
    #[error("Lock not acquired: {0}")]
    LockNotAcquired(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Store(StoreError::Backend(_)) => StatusCode::BAD_GATEWAY,
            Error::Store(StoreError::CapacityExceeded(_)) => StatusCode::INSUFFICIENT_STORAGE,
            Error::Compute(_) | Error::Codec(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::InvalidArgument(_) | Error::Store(StoreError::InvalidEntry(_)) => {
                StatusCode::BAD_REQUEST
            }
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::LockNotAcquired(_) => StatusCode::CONFLICT,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the coordination layer.
pub type Result<T> = std::result::Result<T, Error>;
