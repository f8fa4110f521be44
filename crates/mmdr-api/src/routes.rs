//! API route definitions.

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{cache, convert, health};
use crate::middleware::{cors_layer, request_id};
use crate::state::AppState;
use crate::ws::ws_handler;

/// Create the main router, mounted under the configured context path.
pub fn create_router(state: Arc<AppState>) -> Router {
    let prefix = state.config.route_prefix();
    let body_limit = state.config.max_request_bytes;

    let routes = Router::new()
        .route("/", get(health::service_info))
        .route("/health", get(health::health))
        .route("/svg", get(convert::get_svg))
        .route("/png", get(convert::get_png))
        .merge(convert_routes())
        .merge(cache_routes())
        .route("/ws", get(ws_handler));

    let app = if prefix.is_empty() {
        routes
    } else {
        Router::new().nest(&prefix, routes)
    };

    app.fallback(health::not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

fn convert_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/convert/svg", post(convert::convert_svg))
        .route("/convert/png", post(convert::convert_png))
}

fn cache_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/cache", delete(cache::clear))
        .route("/cache/stats", get(cache::stats))
        .route("/cache/{key}", delete(cache::delete_entry))
}
