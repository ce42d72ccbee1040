//! API error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// API errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Query error: {0}")]
    Query(String),

    /// The tag index could not be reached; no partial result is produced
    #[error("Tag index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Tag index error: {0}")]
    Index(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for API operations
pub type Result<T> = std::result::Result<T, ApiError>;

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            ApiError::Query(msg) => (StatusCode::BAD_REQUEST, "query", msg.clone()),
            ApiError::IndexUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "index_unavailable", msg.clone())
            }
            ApiError::Index(msg) => (StatusCode::BAD_GATEWAY, "index", msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg.clone()),
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<graphex_query::QueryError> for ApiError {
    fn from(e: graphex_query::QueryError) -> Self {
        ApiError::Query(e.to_string())
    }
}

impl From<graphex_index::IndexError> for ApiError {
    fn from(e: graphex_index::IndexError) -> Self {
        match e {
            graphex_index::IndexError::Unavailable(msg) => ApiError::IndexUnavailable(msg),
            other => ApiError::Index(other.to_string()),
        }
    }
}
