//! HTTP API integration tests
//!
//! Routes are exercised end to end against an in-process tag store.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use graphex_api::{create_router, AppState, GraphExplorer};
use graphex_core::{Tags, Target};
use graphex_graph::{Graph, GraphDefinition, GraphTransform, Rule, RuleTable, TagPattern};
use graphex_index::{IndexError, IndexFilter, IndexHit, MemoryTagStore, TagStore};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn fleet() -> Vec<Target> {
    let mut targets = Vec::new();
    for server in ["db01", "web01", "web02"] {
        for dir in ["rx", "tx"] {
            targets.push(
                Target::new(format!("servers.{}.network.eth0.{}_bytes", server, dir))
                    .tag("server", server)
                    .tag("what", "bytes")
                    .tag("target_type", "counter")
                    .tag("type", dir)
                    .tag("unit", "B"),
            );
        }
        targets.push(
            Target::new(format!("servers.{}.cpu.total.idle", server))
                .tag("server", server)
                .tag("what", "cpu_state")
                .tag("target_type", "gauge_pct")
                .tag("type", "idle"),
        );
    }
    targets
}

fn cpu_definition() -> GraphDefinition {
    let mut tags = Tags::new();
    tags.insert("server".into(), "web01".into());
    tags.insert("what".into(), "cpu_state".into());
    GraphDefinition::new("web01_cpu_overview", tags, Graph::new("-1hour", "now"))
}

fn router_with(explorer: GraphExplorer) -> Router {
    let state = Arc::new(AppState::new(Arc::new(explorer), 8));
    create_router(state, Duration::from_secs(5))
}

fn test_router() -> Router {
    let rules = RuleTable::new().rule(Rule::transform(
        TagPattern::any(),
        GraphTransform::builtin("title_from_constants").unwrap(),
    ));
    let explorer = GraphExplorer::new(Arc::new(MemoryTagStore::from_targets(&fleet())))
        .with_definitions([cpu_definition()])
        .with_rules(rules);
    router_with(explorer)
}

async fn request(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json).unwrap())
        }
        None => Body::empty(),
    };

    let response = router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = request(router, "GET", uri, None).await;
    (status, serde_json::from_slice(&body).unwrap_or(json!({})))
}

fn graph_keys(response: &Value) -> Vec<String> {
    response["graphs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|pair| pair[0].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_health_endpoint() {
    let router = test_router();
    let (status, json) = get_json(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_graphs_by_path() {
    let router = test_router();
    let (status, json) = get_json(&router, "/graphs/what=bytes%20server=web01").await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(json["query"]["statement"], "graph");
    assert_eq!(graph_keys(&json), vec!["counter__bytes__web01"]);
    let graph = &json["graphs"][0][1];
    assert_eq!(graph["targets"].as_array().unwrap().len(), 2);
    assert_eq!(graph["promoted_constants"]["unit"], "B");
    assert_eq!(graph["title"], "web01 counter B bytes");
    assert_eq!(json["stats"]["targets_all"], 9);
    assert_eq!(json["stats"]["targets_matching"], 2);
}

#[tokio::test]
async fn test_graphs_by_post_include_definitions() {
    let router = test_router();
    let (status, body) = request(
        &router,
        "POST",
        "/graphs",
        Some(json!({ "query": "from -2days server=web01 what=cpu_state" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(
        graph_keys(&json),
        vec!["gauge_pct__cpu_state__web01", "web01_cpu_overview"]
    );
    assert_eq!(json["graphs"][1][1]["from"], "-2days");
    assert_eq!(json["stats"]["graphs_all"], 1);
    assert_eq!(json["stats"]["graphs_matching"], 1);
    assert_eq!(json["stats"]["graphs_targets_matching"], 1);
    assert_eq!(json["stats"]["graphs_matching_all"], 2);
}

#[tokio::test]
async fn test_list_statement_returns_targets_only() {
    let router = test_router();
    let (status, json) = get_json(&router, "/graphs/list%20from%20-1hour%20to%20now%20server=db*").await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(json["query"]["statement"], "list");
    assert_eq!(json["query"]["from"], "-1hour");
    assert!(json["graphs"].as_array().unwrap().is_empty());
    // `server=db*` is an exact match, nothing is literally named `db*`
    assert!(json["targets_list"].as_object().unwrap().is_empty());

    let (_, json) = get_json(&router, "/graphs/list%20server:db").await;
    let listed = json["targets_list"].as_object().unwrap();
    assert_eq!(listed.len(), 3);
    assert!(listed.contains_key("servers.db01.cpu.total.idle"));
}

#[tokio::test]
async fn test_sum_by_server() {
    let router = test_router();
    let (status, json) = get_json(&router, "/graphs/sum%20by%20server%20what=bytes").await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(graph_keys(&json), vec!["counter__bytes"]);
    let graph = &json["graphs"][0][1];
    let targets = graph["targets"].as_array().unwrap();
    assert_eq!(targets.len(), 2);
    for target in targets {
        assert!(target["target"].as_str().unwrap().starts_with("sumSeries("));
        assert_eq!(target["sources"].as_array().unwrap().len(), 3);
        assert!(target["variables"]["type"].is_string());
    }
    // both sums carry the same placeholder, so it ends up promoted
    assert_eq!(graph["promoted_constants"]["server"], "sumSeries (3 values)");
}

#[tokio::test]
async fn test_bad_regex_is_reported_not_fatal() {
    let router = test_router();
    let (status, json) = get_json(&router, "/graphs/what=bytes%20foo(").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["graphs"].as_array().unwrap().is_empty());
    assert_eq!(json["diagnostics"][0]["source"], "foo(");
    assert_eq!(json["diagnostics"][0]["severity"], "error");
}

#[tokio::test]
async fn test_ambiguous_aggregation_is_bad_request() {
    let router = test_router();
    let (status, json) = get_json(&router, "/graphs/sum%20by%20server%20avg%20by%20server").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "query");
}

#[tokio::test]
async fn test_empty_post_query_is_bad_request() {
    let router = test_router();
    let (status, _) = request(&router, "POST", "/graphs", Some(json!({ "query": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_inspect_and_debug_metrics() {
    let router = test_router();
    let (status, json) = get_json(
        &router,
        "/inspect/servers.web01.cpu.total.idle,servers.nope",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_object().unwrap().len(), 1);
    assert_eq!(json["servers.web01.cpu.total.idle"]["tags"]["type"], "idle");

    let (status, _) = get_json(&router, "/inspect/servers.nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = request(&router, "GET", "/debug/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 9);
    assert_eq!(lines[0], "servers.db01.cpu.total.idle");
}

/// Store whose backend is never reachable
struct DownStore;

#[async_trait]
impl TagStore for DownStore {
    fn name(&self) -> &'static str {
        "down"
    }

    async fn search(&self, _filter: &IndexFilter, _size: usize) -> graphex_index::Result<Vec<IndexHit>> {
        Err(IndexError::Unavailable("connection refused".to_string()))
    }

    async fn get(&self, _id: &str) -> graphex_index::Result<Option<IndexHit>> {
        Err(IndexError::Unavailable("connection refused".to_string()))
    }

    async fn count(&self) -> graphex_index::Result<usize> {
        Err(IndexError::Unavailable("connection refused".to_string()))
    }

    async fn index(&self, _docs: &[IndexHit]) -> graphex_index::Result<usize> {
        Err(IndexError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_unreachable_index_fails_the_request() {
    let router = router_with(GraphExplorer::new(Arc::new(DownStore)));
    let (status, json) = get_json(&router, "/graphs/what=bytes").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], "index_unavailable");
    assert!(json.get("graphs").is_none());
}
