//! Health check and service description handlers.

use crate::error::ApiError;
use crate::headers::GLOSSARY;
use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, header},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use mmdr_core::RenderDefaults;
use mmdr_render::{MetricsSnapshot, ResourceStatus};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub version: &'static str,
    pub config: HealthConfig,
    pub backend: ResourceStatus,
    pub live_sessions: usize,
    pub metrics: MetricsSnapshot,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    pub context_path: String,
    pub cache: CacheSummary,
    pub browser: BrowserSummary,
    pub defaults: DefaultsSummary,
}

#[derive(Serialize)]
pub struct CacheSummary {
    pub enabled: bool,
    pub directory: String,
    pub ttl: u64,
}

#[derive(Serialize)]
pub struct BrowserSummary {
    pub cached: bool,
    pub timeout: u64,
}

#[derive(Serialize)]
pub struct DefaultsSummary {
    pub theme: String,
    pub background: String,
    pub width: u32,
    pub height: u32,
}

impl From<&RenderDefaults> for DefaultsSummary {
    fn from(defaults: &RenderDefaults) -> Self {
        Self {
            theme: defaults.theme.clone(),
            background: defaults.background_color.clone(),
            width: defaults.width,
            height: defaults.height,
        }
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let coordinator = &state.coordinator;
    let cache = coordinator.cache();
    let render = coordinator.config();
    let backend = coordinator.resources().status();

    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION"),
        config: HealthConfig {
            context_path: state.config.context_path.clone(),
            cache: CacheSummary {
                enabled: cache.is_enabled(),
                directory: cache.location(),
                ttl: cache.ttl().as_millis() as u64,
            },
            browser: BrowserSummary {
                cached: backend.state == "ready",
                timeout: render.render_timeout.as_millis() as u64,
            },
            defaults: DefaultsSummary::from(&render.defaults),
        },
        backend,
        live_sessions: state.sessions.len(),
        metrics: coordinator.metrics().snapshot(),
    })
}

/// Describe the service: endpoints, parameters, and response headers.
pub async fn service_info(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Json<Value> {
    let config = &state.config;
    let defaults = &state.coordinator.config().defaults;
    let cache = state.coordinator.cache();

    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    let base_url = format!("http://{}", host);
    let sample = BASE64.encode("graph TD\n    A[Start] --> B[End]");

    let endpoints: Map<String, Value> = [
        ("GET", "/health", "Health check with cache, backend, and metrics status"),
        ("GET", "/svg", "Convert to SVG via GET (query: mmd, theme, bg, w, h)"),
        ("GET", "/png", "Convert to PNG via GET (query: mmd, theme, bg, w, h)"),
        ("POST", "/convert/svg", "Convert mermaid diagram to SVG"),
        ("POST", "/convert/png", "Convert mermaid diagram to PNG (binary or base64)"),
        ("GET", "/cache/stats", "Cache statistics"),
        ("DELETE", "/cache", "Clear cache"),
        ("DELETE", "/cache/{key}", "Delete one cache entry by key"),
        ("GET", "/ws", "Live Update Channel (WebSocket)"),
    ]
    .into_iter()
    .map(|(method, path, text)| (format!("{} {}", method, config.route(path)), json!(text)))
    .collect();

    let response_headers: Map<String, Value> = GLOSSARY
        .iter()
        .map(|(name, text)| (name.to_string(), json!(text)))
        .collect();

    Json(json!({
        "name": "mmdr",
        "version": env!("CARGO_PKG_VERSION"),
        "contextPath": config.context_path,
        "endpoints": endpoints,
        "parameters": {
            "mmd": "Base64 encoded mermaid diagram code (for GET requests)",
            "theme": format!("default|dark|forest|neutral (default: {})", defaults.theme),
            "bg": format!("white|transparent|#hexcolor (default: {})", defaults.background_color),
            "w": format!("width in pixels (default: {})", defaults.width),
            "h": format!("height in pixels (default: {})", defaults.height),
            "format": "binary|base64 (for PNG POST requests only)",
        },
        "cache": {
            "enabled": cache.is_enabled(),
            "ttl_hours": cache.ttl().as_secs_f64() / 3600.0,
            "directory": cache.location(),
        },
        "examples": {
            "GET SVG": format!("{}{}?mmd={}&theme=dark", base_url, config.route("/svg"), sample),
            "GET PNG": format!("{}{}?mmd={}&bg=transparent", base_url, config.route("/png"), sample),
            "POST Body": {
                "mermaid": "graph TD\n    A[Client] --> B[Server]",
                "theme": defaults.theme,
                "backgroundColor": defaults.background_color,
            },
        },
        "response_headers": response_headers,
    }))
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("Endpoint not found")
}
