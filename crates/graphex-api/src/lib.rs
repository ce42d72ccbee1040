//! graphex API - Query facade and REST API for the graph explorer
//!
//! This crate provides:
//! - `GraphExplorer`: free-text query in, graphs or a target list out
//! - Graph endpoints (`GET /graphs/:query`, `POST /graphs`)
//! - Metric inspection and debug listing
//! - Health endpoint

pub mod error;
pub mod explorer;
pub mod handlers;
pub mod router;

pub use error::{ApiError, Result};
pub use explorer::{ExplorerResponse, ExplorerStats, GraphExplorer};
pub use handlers::AppState;
pub use router::create_router;
