//! HTTP surface driven through the router without a socket.

mod support;

use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use mmdr_api::ApiConfig;
use mmdr_cache::{CacheConfig, FilesystemStore};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use support::{BACKEND_PNG, BACKEND_SVG, DERIVED_PREFIX, TestApp, body_bytes, body_json, delete, get, post_json};
use tower::ServiceExt;

const SOURCE: &str = "graph TD\n    A[Start] --> B[End]";

fn encoded() -> String {
    BASE64.encode(SOURCE)
}

#[tokio::test]
async fn test_health_reports_configuration() {
    let app = TestApp::new(ApiConfig::default());
    let response = app.router().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["config"]["contextPath"], "/");
    assert_eq!(body["config"]["cache"]["enabled"], true);
    assert_eq!(body["config"]["browser"]["cached"], false);
    assert_eq!(body["config"]["defaults"]["width"], 800);
    assert_eq!(body["metrics"]["renders"], 0);
}

#[tokio::test]
async fn test_service_info_lists_endpoints() {
    let app = TestApp::new(ApiConfig::default());
    let body = body_json(app.router().oneshot(get("/")).await.unwrap()).await;

    assert_eq!(body["name"], "mmdr");
    assert!(body["endpoints"]["GET /svg"].is_string());
    assert!(body["endpoints"]["DELETE /cache/{key}"].is_string());
    assert!(body["response_headers"]["X-Mermaid-Cache"].is_string());
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let app = TestApp::new(ApiConfig::default());
    let response = app.router().oneshot(get("/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await, json!({"error": "Endpoint not found"}));
}

#[tokio::test]
async fn test_get_requires_mmd() {
    let app = TestApp::new(ApiConfig::default());
    let response = app.router().oneshot(get("/svg?theme=dark")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"],
        "mmd parameter (base64 encoded mermaid code) is required"
    );
}

#[tokio::test]
async fn test_get_rejects_undecodable_mmd() {
    let app = TestApp::new(ApiConfig::default());
    let response = app.router().oneshot(get("/svg?mmd=%25%25%25")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.script.renders(), 0);
}

#[tokio::test]
async fn test_miss_then_derived_then_hit() {
    let app = TestApp::new(ApiConfig::default());
    let query = format!("mmd={}&theme=dark&w=1024", urlencode(&encoded()));

    let response = app.router().oneshot(get(&format!("/svg?{}", query))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers["content-type"], "image/svg+xml");
    assert_eq!(headers["x-mermaid-cache"], "MISS");
    assert_eq!(headers["x-mermaid-source"], "backend");
    assert_eq!(headers["x-mermaid-browser-reused"], "false");
    assert_eq!(headers["cache-control"], "public, max-age=3600");
    assert!(headers.get("x-request-id").is_some());
    let params: serde_json::Value =
        serde_json::from_str(headers["x-mermaid-params"].to_str().unwrap()).unwrap();
    assert_eq!(params, json!({"theme": "dark", "backgroundColor": "white", "width": 1024, "height": 600}));
    assert_eq!(body_bytes(response).await, BACKEND_SVG.as_bytes());
    let key = headers["x-mermaid-cache-key"].to_str().unwrap().to_string();

    let response = app.router().oneshot(get(&format!("/png?{}", query))).await.unwrap();
    assert_eq!(response.headers()["x-mermaid-cache"], "HIT-DERIVED");
    assert_eq!(response.headers()["x-mermaid-source"], "cache-derived");
    assert_eq!(response.headers()["x-mermaid-cache-key"], key.as_str());
    assert!(response.headers().get("x-mermaid-browser-reused").is_none());
    assert!(body_bytes(response).await.starts_with(DERIVED_PREFIX));

    let response = app.router().oneshot(get(&format!("/png?{}", query))).await.unwrap();
    assert_eq!(response.headers()["x-mermaid-cache"], "HIT");
    assert_eq!(response.headers()["content-type"], "image/png");

    assert_eq!(app.script.renders(), 1);
}

#[tokio::test]
async fn test_post_requires_mermaid() {
    let app = TestApp::new(ApiConfig::default());
    let response = app
        .router()
        .oneshot(post_json("/convert/svg", json!({"theme": "dark"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Mermaid diagram text is required");
}

#[tokio::test]
async fn test_post_png_base64() {
    let app = TestApp::new(ApiConfig::default());
    let response = app
        .router()
        .oneshot(post_json(
            "/convert/png",
            json!({"mermaid": SOURCE, "backgroundColor": "transparent", "format": "base64"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-mermaid-cache"], "MISS");
    assert!(response.headers().get("cache-control").is_none());

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["encoding"], "base64");
    assert_eq!(body["size"], BACKEND_PNG.len());
    let data = BASE64.decode(body["data"].as_str().unwrap()).unwrap();
    assert_eq!(data, BACKEND_PNG);
}

#[tokio::test]
async fn test_backend_failure_is_500_with_context() {
    let app = TestApp::new(ApiConfig::default());
    app.script.fail_renders_with("Parse error on line 2");

    let response = app
        .router()
        .oneshot(post_json("/convert/svg", json!({"mermaid": "graph TD\nA-->"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await["error"],
        "Failed to convert mermaid to SVG: Parse error on line 2"
    );
}

#[tokio::test]
async fn test_body_limit() {
    let config = ApiConfig {
        max_request_bytes: 64,
        ..Default::default()
    };
    let app = TestApp::new(config);
    let response = app
        .router()
        .oneshot(post_json("/convert/svg", json!({"mermaid": "x".repeat(200)})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.script.renders(), 0);
}

#[tokio::test]
async fn test_cache_management() {
    let app = TestApp::new(ApiConfig::default());
    let response = app
        .router()
        .oneshot(post_json("/convert/svg", json!({"mermaid": SOURCE})))
        .await
        .unwrap();
    let key = response.headers()["x-mermaid-cache-key"].to_str().unwrap().to_string();

    let stats = body_json(app.router().oneshot(get("/cache/stats")).await.unwrap()).await;
    assert_eq!(stats["enabled"], true);
    assert_eq!(stats["files"], json!({"svg": 1, "png": 0, "meta": 1, "total": 2}));

    let response = app.router().oneshot(delete("/cache/not-a-key")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Invalid cache key format");

    let response = app.router().oneshot(delete(&format!("/cache/{}", key))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["removed"], json!([format!("{}.svg", key), format!("{}.svg.meta.json", key)]));

    let response = app.router().oneshot(delete(&format!("/cache/{}", key))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "Cache entry not found");

    let response = app.router().oneshot(delete("/cache")).await.unwrap();
    assert_eq!(body_json(response).await, json!({"success": true, "message": "Cache cleared"}));
}

#[tokio::test]
async fn test_filesystem_cache_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FilesystemStore::new(dir.path().to_path_buf()));
    let app = TestApp::with_store(ApiConfig::default(), CacheConfig::default(), store);

    let response = app
        .router()
        .oneshot(post_json("/convert/svg", json!({"mermaid": SOURCE})))
        .await
        .unwrap();
    assert_eq!(response.headers()["x-mermaid-cache"], "MISS");
    let key = response.headers()["x-mermaid-cache-key"].to_str().unwrap().to_string();

    let artifact = dir.path().join(format!("{}.svg", key));
    assert_eq!(std::fs::read_to_string(&artifact).unwrap(), BACKEND_SVG);
    assert!(dir.path().join(format!("{}.svg.meta.json", key)).exists());

    let stats = body_json(app.router().oneshot(get("/cache/stats")).await.unwrap()).await;
    assert_eq!(stats["directory"], dir.path().display().to_string());
    assert_eq!(stats["files"], json!({"svg": 1, "png": 0, "meta": 1, "total": 2}));

    let response = app
        .router()
        .oneshot(post_json("/convert/svg", json!({"mermaid": SOURCE})))
        .await
        .unwrap();
    assert_eq!(response.headers()["x-mermaid-cache"], "HIT");
    assert_eq!(app.script.renders(), 1);

    let response = app.router().oneshot(delete(&format!("/cache/{}", key))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!artifact.exists());
}

#[tokio::test]
async fn test_disabled_cache_endpoints() {
    let app = TestApp::with_cache(
        ApiConfig::default(),
        CacheConfig {
            enabled: false,
            ..Default::default()
        },
    );

    let stats = body_json(app.router().oneshot(get("/cache/stats")).await.unwrap()).await;
    assert_eq!(stats, json!({"enabled": false}));

    let response = app
        .router()
        .oneshot(delete(&format!("/cache/{}", "a".repeat(64))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Cache disabled");

    for _ in 0..2 {
        let response = app
            .router()
            .oneshot(post_json("/convert/svg", json!({"mermaid": SOURCE})))
            .await
            .unwrap();
        assert_eq!(response.headers()["x-mermaid-cache"], "MISS");
    }
    assert_eq!(app.script.renders(), 2);
}

#[tokio::test]
async fn test_context_path() {
    let app = TestApp::new(ApiConfig::default().with_context_path("/diagrams/"));

    let response = app.router().oneshot(get("/diagrams/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["config"]["contextPath"], "/diagrams/");

    let response = app.router().oneshot(get("/diagrams")).await.unwrap();
    assert_eq!(body_json(response).await["endpoints"]["GET /diagrams/svg"].is_string(), true);

    let response = app.router().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

fn urlencode(value: &str) -> String {
    value
        .replace('+', "%2B")
        .replace('/', "%2F")
        .replace('=', "%3D")
}
