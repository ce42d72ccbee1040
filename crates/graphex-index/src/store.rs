//! Tag store contract shared by all index backends

use crate::error::Result;
use crate::filter::IndexFilter;
use async_trait::async_trait;
use graphex_core::Target;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default number of hits requested per search
pub const DEFAULT_SEARCH_SIZE: usize = 1000;

/// One indexed metric, in index representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexHit {
    pub id: String,
    /// `key=value` strings
    pub tags: Vec<String>,
}

impl IndexHit {
    pub fn new(id: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            id: id.into(),
            tags,
        }
    }

    /// Decode into a target
    pub fn into_target(self) -> Result<Target> {
        Ok(Target::from_tag_strings(self.id, &self.tags)?)
    }
}

impl From<&Target> for IndexHit {
    fn from(target: &Target) -> Self {
        Self {
            id: target.id.clone(),
            tags: target.tag_strings(),
        }
    }
}

/// Searchable store of tagged metrics
#[async_trait]
pub trait TagStore: Send + Sync {
    /// Backend name, for logging
    fn name(&self) -> &'static str;

    /// Return up to `size` documents matching the filter, ordered by id
    async fn search(&self, filter: &IndexFilter, size: usize) -> Result<Vec<IndexHit>>;

    /// Fetch a single document
    async fn get(&self, id: &str) -> Result<Option<IndexHit>>;

    /// Number of indexed documents
    async fn count(&self) -> Result<usize>;

    /// Insert or replace documents. Returns how many were written.
    async fn index(&self, docs: &[IndexHit]) -> Result<usize>;

    /// Search and decode hits into targets keyed by id
    async fn search_targets(
        &self,
        filter: &IndexFilter,
        size: usize,
    ) -> Result<BTreeMap<String, Target>> {
        self.search(filter, size)
            .await?
            .into_iter()
            .map(|hit| hit.into_target().map(|t| (t.id.clone(), t)))
            .collect()
    }
}
