//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror. Only `InvalidArgument` and
//! `DestroyedInstance` are ever returned from public engine operations; the
//! other variants are produced for the diagnostic hook and logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Malformed key, ttl or other caller-supplied argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A persistent store call failed; the engine keeps serving from memory
    #[error("Store failure: {0}")]
    StoreFailure(String),

    /// A refresher failed twice in one refresh cycle
    #[error("Refresher failure for key '{key}': {message}")]
    RefresherFailure { key: String, message: String },

    /// The engine was destroyed and no longer accepts calls
    #[error("Cache instance '{0}' has been destroyed")]
    DestroyedInstance(String),
}

// == Adapter Errors ==
/// Error raised by a persistent store adapter.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Error raised by a broadcast transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        CacheError::StoreFailure(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            CacheError::DestroyedInstance(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::StoreFailure(_) | CacheError::RefresherFailure { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
