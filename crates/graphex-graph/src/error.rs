//! Graph error types

use thiserror::Error;

/// Graph building and rule errors
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Invalid tag pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Unknown transform: {0}")]
    UnknownTransform(String),

    #[error("Transform '{name}' failed: {reason}")]
    Transform { name: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

impl From<serde_json::Error> for GraphError {
    fn from(e: serde_json::Error) -> Self {
        GraphError::Serialization(e.to_string())
    }
}
