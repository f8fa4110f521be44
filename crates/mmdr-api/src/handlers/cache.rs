//! Cache management handlers.

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use mmdr_core::CacheKey;
use serde_json::{Value, json};
use std::sync::Arc;

pub async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let cache = state.coordinator.cache();
    if !cache.is_enabled() {
        return Ok(Json(json!({ "enabled": false })));
    }

    let stats = cache.stats().await?;
    Ok(Json(json!(stats)))
}

pub async fn clear(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let cache = state.coordinator.cache();
    if !cache.is_enabled() {
        return Ok(Json(json!({ "enabled": false })));
    }

    cache.clear().await?;
    Ok(Json(json!({ "success": true, "message": "Cache cleared" })))
}

pub async fn delete_entry(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let cache = state.coordinator.cache();
    if !cache.is_enabled() {
        return Err(ApiError::bad_request("Cache disabled"));
    }

    let key: CacheKey = key.parse()?;
    let removed = cache.delete(&key).await?;
    if removed.is_empty() {
        return Err(ApiError::not_found("Cache entry not found"));
    }
    Ok(Json(json!({ "success": true, "removed": removed })))
}
