//! Query error types

use thiserror::Error;

/// Query errors
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Tag '{0}' cannot be used in both 'sum by' and 'avg by'")]
    AmbiguousAggregation(String),
}

/// Result type for query operations
pub type Result<T> = std::result::Result<T, QueryError>;
