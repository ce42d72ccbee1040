//! In-process tag store
//!
//! Inverted index from `key=value` tag strings to Roaring bitmaps of internal
//! document ids. Term filters are bitmap lookups; regexp filters scan the
//! distinct tag strings (or ids) and union the matching bitmaps.

use crate::error::Result;
use crate::filter::{compile_index_regexp, Field, IndexFilter};
use crate::store::{IndexHit, TagStore};
use async_trait::async_trait;
use dashmap::DashMap;
use graphex_core::Target;
use parking_lot::RwLock;
use roaring::RoaringBitmap;
use tracing::debug;

/// Tag store held entirely in memory
pub struct MemoryTagStore {
    /// Tag string -> bitmap of internal ids
    index: DashMap<String, RoaringBitmap>,
    /// Document id -> internal id (u32) for Roaring
    id_to_internal: DashMap<String, u32>,
    /// Internal id -> document id
    internal_to_id: RwLock<Vec<String>>,
    /// Internal id -> tag strings of the live document
    docs: DashMap<u32, Vec<String>>,
}

impl MemoryTagStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            index: DashMap::new(),
            id_to_internal: DashMap::new(),
            internal_to_id: RwLock::new(Vec::new()),
            docs: DashMap::new(),
        }
    }

    /// Create a store pre-loaded with targets
    pub fn from_targets<'a>(targets: impl IntoIterator<Item = &'a Target>) -> Self {
        let store = Self::new();
        for target in targets {
            store.insert(&IndexHit::from(target));
        }
        store
    }

    /// Insert or replace one document
    pub fn insert(&self, doc: &IndexHit) {
        let internal_id = self.get_or_create_internal_id(&doc.id);

        if let Some(previous) = self.docs.insert(internal_id, doc.tags.clone()) {
            for tag in previous {
                if let Some(mut bitmap) = self.index.get_mut(&tag) {
                    bitmap.remove(internal_id);
                }
            }
            self.index.retain(|_, bitmap| !bitmap.is_empty());
        }

        for tag in &doc.tags {
            self.index
                .entry(tag.clone())
                .or_insert_with(RoaringBitmap::new)
                .insert(internal_id);
        }
    }

    /// Remove a document
    pub fn remove(&self, id: &str) -> bool {
        let Some(internal_id) = self.id_to_internal.get(id).map(|v| *v) else {
            return false;
        };
        match self.docs.remove(&internal_id) {
            Some((_, tags)) => {
                for tag in tags {
                    if let Some(mut bitmap) = self.index.get_mut(&tag) {
                        bitmap.remove(internal_id);
                    }
                }
                self.index.retain(|_, bitmap| !bitmap.is_empty());
                true
            }
            None => false,
        }
    }

    /// Number of live documents
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Number of distinct tag strings
    pub fn tag_count(&self) -> usize {
        self.index.len()
    }

    /// Evaluate a filter into a bitmap of internal ids
    pub fn evaluate(&self, filter: &IndexFilter) -> Result<RoaringBitmap> {
        let bitmap = match filter {
            IndexFilter::MatchAll => self.all_docs_bitmap(),
            IndexFilter::Term {
                field: Field::Tags,
                value,
            } => self
                .index
                .get(value)
                .map(|bitmap| bitmap.value().clone())
                .unwrap_or_default(),
            IndexFilter::Term {
                field: Field::Id,
                value,
            } => {
                let mut bitmap = RoaringBitmap::new();
                if let Some(internal_id) = self.id_to_internal.get(value) {
                    if self.docs.contains_key(&*internal_id) {
                        bitmap.insert(*internal_id);
                    }
                }
                bitmap
            }
            IndexFilter::Regexp {
                field: Field::Tags,
                pattern,
            } => {
                let re = compile_index_regexp(pattern)?;
                let mut bitmap = RoaringBitmap::new();
                for entry in self.index.iter() {
                    if re.is_match(entry.key()) {
                        bitmap |= entry.value();
                    }
                }
                bitmap
            }
            IndexFilter::Regexp {
                field: Field::Id,
                pattern,
            } => {
                let re = compile_index_regexp(pattern)?;
                let internal_map = self.internal_to_id.read();
                internal_map
                    .iter()
                    .enumerate()
                    .filter(|(i, id)| self.docs.contains_key(&(*i as u32)) && re.is_match(id))
                    .map(|(i, _)| i as u32)
                    .collect()
            }
            IndexFilter::Not(inner) => self.all_docs_bitmap() - self.evaluate(inner)?,
            IndexFilter::And(filters) => {
                let mut bitmap = self.all_docs_bitmap();
                for filter in filters {
                    if bitmap.is_empty() {
                        break;
                    }
                    bitmap &= self.evaluate(filter)?;
                }
                bitmap
            }
            IndexFilter::Or(filters) => {
                let mut bitmap = RoaringBitmap::new();
                for filter in filters {
                    bitmap |= self.evaluate(filter)?;
                }
                bitmap
            }
        };
        Ok(bitmap)
    }

    fn all_docs_bitmap(&self) -> RoaringBitmap {
        self.docs.iter().map(|entry| *entry.key()).collect()
    }

    fn hit(&self, internal_id: u32, id: &str) -> Option<IndexHit> {
        self.docs
            .get(&internal_id)
            .map(|tags| IndexHit::new(id, tags.value().clone()))
    }

    fn get_or_create_internal_id(&self, id: &str) -> u32 {
        if let Some(internal_id) = self.id_to_internal.get(id) {
            return *internal_id;
        }
        *self
            .id_to_internal
            .entry(id.to_string())
            .or_insert_with(|| {
                let mut internal_map = self.internal_to_id.write();
                let internal_id = internal_map.len() as u32;
                internal_map.push(id.to_string());
                internal_id
            })
    }
}

impl Default for MemoryTagStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TagStore for MemoryTagStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn search(&self, filter: &IndexFilter, size: usize) -> Result<Vec<IndexHit>> {
        let bitmap = self.evaluate(filter)?;
        let mut ids: Vec<(String, u32)> = {
            let internal_map = self.internal_to_id.read();
            bitmap
                .iter()
                .filter_map(|i| internal_map.get(i as usize).map(|id| (id.clone(), i)))
                .collect()
        };
        ids.sort();
        ids.truncate(size);

        let hits: Vec<IndexHit> = ids
            .into_iter()
            .filter_map(|(id, internal_id)| self.hit(internal_id, &id))
            .collect();
        debug!(matched = bitmap.len(), returned = hits.len(), "Memory store search");
        Ok(hits)
    }

    async fn get(&self, id: &str) -> Result<Option<IndexHit>> {
        let internal_id = self.id_to_internal.get(id).map(|v| *v);
        Ok(internal_id.and_then(|internal_id| self.hit(internal_id, id)))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.len())
    }

    async fn index(&self, docs: &[IndexHit]) -> Result<usize> {
        for doc in docs {
            self.insert(doc);
        }
        Ok(docs.len())
    }
}
