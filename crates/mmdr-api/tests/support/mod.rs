//! In-process server harness with a scripted render backend.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response};
use mmdr_api::{ApiConfig, AppState};
use mmdr_cache::{ArtifactCache, ArtifactStore, CacheConfig, MemoryStore};
use mmdr_core::{
    BackendInstanceId, DisconnectCallback, Error, Format, Rasterizer, RenderBackend,
    RenderParams, RenderSession, Result,
};
use mmdr_render::{RenderConfig, RenderCoordinator, RenderMetrics, ResourceManager};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const BACKEND_SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="20"></svg>"#;
pub const BACKEND_PNG: &[u8] = b"\x89PNG-from-backend";
pub const DERIVED_PREFIX: &[u8] = b"raster:";

#[derive(Default)]
pub struct Script {
    pub launches: AtomicUsize,
    pub renders: AtomicUsize,
    pub sources: Mutex<Vec<String>>,
    pub render_error: Mutex<Option<String>>,
    pub render_delay: Mutex<Duration>,
}

impl Script {
    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    pub fn sources(&self) -> Vec<String> {
        self.sources.lock().clone()
    }

    pub fn fail_renders_with(&self, message: &str) {
        *self.render_error.lock() = Some(message.to_string());
    }
}

pub struct ScriptedBackend(pub Arc<Script>);

#[async_trait]
impl RenderBackend for ScriptedBackend {
    async fn launch(
        &self,
        _instance: BackendInstanceId,
        _on_disconnect: DisconnectCallback,
    ) -> Result<Arc<dyn RenderSession>> {
        self.0.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedSession(Arc::clone(&self.0))))
    }
}

struct ScriptedSession(Arc<Script>);

#[async_trait]
impl RenderSession for ScriptedSession {
    async fn render(&self, source: &str, format: Format, _params: &RenderParams) -> Result<Vec<u8>> {
        self.0.renders.fetch_add(1, Ordering::SeqCst);
        self.0.sources.lock().push(source.to_string());

        let delay = *self.0.render_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.0.render_error.lock().clone() {
            return Err(Error::RenderFailed {
                context: "worker".to_string(),
                message,
            });
        }

        Ok(match format {
            Format::Svg => BACKEND_SVG.as_bytes().to_vec(),
            Format::Png => BACKEND_PNG.to_vec(),
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

struct TaggingRasterizer;

impl Rasterizer for TaggingRasterizer {
    fn to_raster(&self, svg: &[u8]) -> Result<Vec<u8>> {
        let mut png = DERIVED_PREFIX.to_vec();
        png.extend_from_slice(svg);
        Ok(png)
    }
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub script: Arc<Script>,
}

impl TestApp {
    pub fn new(config: ApiConfig) -> Self {
        Self::with_cache(config, CacheConfig::default())
    }

    pub fn with_cache(config: ApiConfig, cache: CacheConfig) -> Self {
        Self::with_store(config, cache, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(config: ApiConfig, cache: CacheConfig, store: Arc<dyn ArtifactStore>) -> Self {
        let script = Arc::new(Script::default());
        let render = RenderConfig::default();
        let resources = Arc::new(ResourceManager::new(
            Arc::new(ScriptedBackend(Arc::clone(&script))),
            render.clone(),
            RenderMetrics::new(),
        ));
        let cache = Arc::new(ArtifactCache::new(store, cache));
        let coordinator = Arc::new(RenderCoordinator::new(
            cache,
            resources,
            Arc::new(TaggingRasterizer),
            render,
        ));

        Self {
            state: Arc::new(AppState::new(coordinator, config)),
            script,
        }
    }

    pub fn router(&self) -> axum::Router {
        mmdr_api::create_router(Arc::clone(&self.state))
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body")
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("request")
}

pub fn delete(uri: &str) -> Request<Body> {
    Request::delete(uri).body(Body::empty()).expect("request")
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}
