//! graphex Query - Query parsing and tag pattern matching
//!
//! This crate provides:
//! - Query model (statement, time window, grouping, aggregation, limit)
//! - Free-text query parser
//! - Pattern compiler and matcher for metrics and graph definitions

pub mod error;
pub mod model;
pub mod parser;
pub mod pattern;

pub use error::{QueryError, Result};
pub use model::{Query, QueryBuilder, Statement};
pub use parser::QueryParser;
pub use pattern::{CompileMode, MatchKind, MatchSpec, PatternSet};
