//! Index error types

use thiserror::Error;

/// Index errors
#[derive(Debug, Error)]
pub enum IndexError {
    /// The index could not be reached. Never reported as an empty result.
    #[error("Tag index unavailable: {0}")]
    Unavailable(String),

    #[error("Index server error: {status} - {message}")]
    Server { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl IndexError {
    /// True if the index could not be reached at all
    pub fn is_unavailable(&self) -> bool {
        matches!(self, IndexError::Unavailable(_))
    }
}

/// Result type for index operations
pub type Result<T> = std::result::Result<T, IndexError>;

impl From<reqwest::Error> for IndexError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            IndexError::Unavailable(e.to_string())
        } else if e.is_decode() {
            IndexError::Serialization(e.to_string())
        } else {
            IndexError::Http(e.to_string())
        }
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(e: serde_json::Error) -> Self {
        IndexError::Serialization(e.to_string())
    }
}

impl From<graphex_core::CoreError> for IndexError {
    fn from(e: graphex_core::CoreError) -> Self {
        IndexError::InvalidData(e.to_string())
    }
}
