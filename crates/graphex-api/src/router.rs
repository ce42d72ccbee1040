//! API router setup

use crate::handlers::{self, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Create the API router
pub fn create_router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        // Query endpoints
        .route("/graphs", post(handlers::graphs_post))
        .route("/graphs/:query", get(handlers::graphs_get))
        // Metric inspection
        .route("/inspect/:ids", get(handlers::inspect))
        .route("/debug/metrics", get(handlers::debug_metrics))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explorer::GraphExplorer;
    use graphex_index::MemoryTagStore;

    #[test]
    fn test_router_creation() {
        let explorer = GraphExplorer::new(Arc::new(MemoryTagStore::new()));
        let state = Arc::new(AppState::new(Arc::new(explorer), 16));
        let _router = create_router(state, Duration::from_secs(30));
    }
}
