//! graphex Core - Core types for the tag-based graph explorer
//!
//! This crate provides the fundamental data types used throughout graphex:
//! - `Tags`: Ordered tag name -> value mapping
//! - `Tag`: Key-value pair in its index representation (`key=value`)
//! - `Target`: A single metric series with its tags
//! - `Matchable`: Anything that can be evaluated by the pattern matcher
//! - `ClassifierRegistry`: Turns raw metric names into tagged targets
//! - `Diagnostics`: Request or process scoped warnings and errors

pub mod classify;
pub mod diagnostics;
pub mod error;
pub mod types;

pub use classify::{ClassifierRegistry, MetricClassifier, RegexClassifier, StatsdClassifier};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{CoreError, Result};
pub use types::*;
