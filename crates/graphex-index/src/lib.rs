//! graphex Index - Tag index access for the graph explorer
//!
//! This crate provides:
//! - Filter expressions over `_id` and `key=value` tag strings
//! - Translation of compiled match patterns into filters
//! - The async `TagStore` contract
//! - An in-process store backed by Roaring bitmaps
//! - An HTTP client for an Elasticsearch-style search service

pub mod error;
pub mod filter;
pub mod http;
pub mod memory;
pub mod store;

pub use error::{IndexError, Result};
pub use filter::{Field, IndexFilter, IndexQueryTranslator};
pub use http::HttpTagStore;
pub use memory::MemoryTagStore;
pub use store::{IndexHit, TagStore, DEFAULT_SEARCH_SIZE};
