//! HTTP request handlers

use crate::error::{ApiError, Result};
use crate::explorer::{ExplorerResponse, GraphExplorer};
use axum::{
    extract::{Path, State},
    response::Json,
};
use graphex_core::Target;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

/// Application state shared across handlers
pub struct AppState {
    pub explorer: Arc<GraphExplorer>,
    /// Caps concurrent index round-trips
    pub query_semaphore: Arc<Semaphore>,
    start_time: Instant,
}

impl AppState {
    pub fn new(explorer: Arc<GraphExplorer>, max_concurrent_queries: usize) -> Self {
        Self {
            explorer,
            query_semaphore: Arc::new(Semaphore::new(max_concurrent_queries)),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Health check handler
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
    })
}

/// Graphs request body
#[derive(Debug, Deserialize)]
pub struct GraphsRequest {
    pub query: String,
}

/// Run a query given in the path
pub async fn graphs_get(
    State(state): State<Arc<AppState>>,
    Path(query): Path<String>,
) -> Result<Json<ExplorerResponse>> {
    render(&state, &query).await
}

/// Run a query given in the body
pub async fn graphs_post(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GraphsRequest>,
) -> Result<Json<ExplorerResponse>> {
    render(&state, &req.query).await
}

async fn render(state: &AppState, query: &str) -> Result<Json<ExplorerResponse>> {
    if query.trim().is_empty() {
        return Err(ApiError::BadRequest("No query given".to_string()));
    }

    let _permit = state
        .query_semaphore
        .acquire()
        .await
        .map_err(|_| ApiError::Internal("Query semaphore closed".to_string()))?;

    Ok(Json(state.explorer.render_graphs(query).await?))
}

/// Show the stored tags of one or more metrics (comma separated ids)
pub async fn inspect(
    State(state): State<Arc<AppState>>,
    Path(ids): Path<String>,
) -> Result<Json<BTreeMap<String, Target>>> {
    let ids: Vec<&str> = ids.split(',').filter(|s| !s.is_empty()).collect();
    if ids.is_empty() {
        return Err(ApiError::BadRequest("No metric ids given".to_string()));
    }

    let found = state.explorer.inspect(&ids).await?;
    if found.is_empty() {
        return Err(ApiError::NotFound(ids.join(",")));
    }
    Ok(Json(found))
}

/// Every indexed metric id, one per line
pub async fn debug_metrics(State(state): State<Arc<AppState>>) -> Result<String> {
    let ids = state.explorer.metric_ids().await?;
    Ok(ids.join("\n"))
}
