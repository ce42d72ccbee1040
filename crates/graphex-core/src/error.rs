//! Error types for graphex-core

use thiserror::Error;

/// Core error types
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Empty tag key")]
    EmptyTagKey,

    #[error("Invalid tag (expected key=value): {0}")]
    InvalidTag(String),

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

