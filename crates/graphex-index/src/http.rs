//! HTTP client for an Elasticsearch-style tag index

use crate::error::{IndexError, Result};
use crate::filter::IndexFilter;
use crate::store::{IndexHit, TagStore};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Documents per bulk request
const BULK_SIZE: usize = 500;

/// Default document type under the index
const DOC_TYPE: &str = "metric";

#[derive(Debug, Serialize, Deserialize)]
struct Source {
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source")]
    source: Source,
}

impl From<Hit> for IndexHit {
    fn from(hit: Hit) -> Self {
        IndexHit::new(hit.id, hit.source.tags)
    }
}

#[derive(Debug, Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<Source>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: usize,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
}

/// Tag store backed by a remote search service
pub struct HttpTagStore {
    client: reqwest::Client,
    base_url: Url,
    index_name: String,
}

impl HttpTagStore {
    /// Create a client for `index_name` on the service at `url`
    pub fn new(url: &str, index_name: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url =
            Url::parse(url).map_err(|e| IndexError::InvalidData(format!("{}: {}", url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(IndexError::InvalidData(format!("{}: not a base URL", url)));
        }

        Ok(Self {
            client,
            base_url,
            index_name: index_name.into(),
        })
    }

    /// URL of `/<index>/metric/<segments...>`
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| IndexError::InvalidData(self.base_url.to_string()))?
            .pop_if_empty()
            .push(&self.index_name)
            .push(DOC_TYPE)
            .extend(segments);
        Ok(url)
    }

    async fn error_from(response: reqwest::Response) -> IndexError {
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        IndexError::Server { status, message }
    }
}

#[async_trait]
impl TagStore for HttpTagStore {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn search(&self, filter: &IndexFilter, size: usize) -> Result<Vec<IndexHit>> {
        let mut url = self.url(&["_search"])?;
        url.query_pairs_mut().append_pair("size", &size.to_string());
        let body = json!({ "query": filter.to_json() });
        debug!(%url, query = %body, "Searching tag index");

        let response = self.client.post(url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let parsed: SearchResponse = response.json().await?;
        let mut hits: Vec<IndexHit> = parsed.hits.hits.into_iter().map(IndexHit::from).collect();
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hits)
    }

    async fn get(&self, id: &str) -> Result<Option<IndexHit>> {
        let url = self.url(&[id])?;
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let parsed: GetResponse = response.json().await?;
        Ok(match (parsed.found, parsed.source) {
            (true, Some(source)) => Some(IndexHit::new(parsed.id, source.tags)),
            _ => None,
        })
    }

    async fn count(&self) -> Result<usize> {
        let url = self.url(&["_count"])?;
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let parsed: CountResponse = response.json().await?;
        Ok(parsed.count)
    }

    async fn index(&self, docs: &[IndexHit]) -> Result<usize> {
        let url = self.url(&["_bulk"])?;
        let mut written = 0;

        for batch in docs.chunks(BULK_SIZE) {
            let mut body = String::new();
            for doc in batch {
                body.push_str(&serde_json::to_string(&json!({ "index": { "_id": doc.id } }))?);
                body.push('\n');
                body.push_str(&serde_json::to_string(&Source {
                    tags: doc.tags.clone(),
                })?);
                body.push('\n');
            }

            let response = self
                .client
                .post(url.clone())
                .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                .body(body)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(Self::error_from(response).await);
            }
            let parsed: BulkResponse = response.json().await?;
            if parsed.errors {
                warn!(batch = batch.len(), "Bulk index reported item errors");
            }
            written += batch.len();
            debug!(written, total = docs.len(), "Bulk indexed batch");
        }

        Ok(written)
    }
}
