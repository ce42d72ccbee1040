//! graphex Graph - Graph building and per-graph rules
//!
//! This crate provides:
//! - Graph model (graphs, graph targets, predefined graph definitions)
//! - Graph builder: partition, aggregate, limit and promote
//! - Rule engine: tag patterns paired with merge or transform actions

pub mod builder;
pub mod error;
pub mod model;
pub mod rules;

pub use builder::{build_definitions, limit_targets, promote_constants, GraphBuilder, GraphSet};
pub use error::{GraphError, Result};
pub use model::{Graph, GraphDefinition, GraphTarget};
pub use rules::{Action, GraphTransform, Rule, RuleConfig, RuleTable, TagPattern, ValuePattern};
