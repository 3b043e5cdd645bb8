//! HTTP and WebSocket surface of a Signet node.
//!
//! The REST routes serve the committed chain: blocks, transactions,
//! receipts, validators, and the contract registry. The `/ws` endpoint
//! streams contract lifecycle and log events fed from the node's event
//! bus. Mutating routes build transactions and put them in the mempool;
//! nothing here touches state directly.

pub mod handlers;
pub mod server;
pub mod types;
pub mod ws;

pub use server::{ApiConfig, ApiContext, ApiServer};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use signet_execution::CompileError;

/// Errors surfaced to HTTP clients.
///
/// Validation problems map to 400, lookup misses to 404, everything the
/// caller cannot fix to 500. On-chain execution failures are not errors
/// at this boundary; they travel inside receipts.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(serde::Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(reason) => {
                error!(%reason, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<signet_storage::StorageError> for ApiError {
    fn from(err: signet_storage::StorageError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<CompileError> for ApiError {
    fn from(err: CompileError) -> Self {
        match err {
            // the compiler's own diagnostics go to the caller verbatim
            CompileError::Source(message) => ApiError::BadRequest(message),
            CompileError::MalformedOutput(message) => ApiError::BadRequest(message),
            CompileError::Unavailable(message) => ApiError::Internal(message),
        }
    }
}
