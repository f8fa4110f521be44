//! Scripted render backend for exercising the pipeline without a worker.

#![allow(dead_code)]

use async_trait::async_trait;
use mmdr_core::{
    BackendInstanceId, DisconnectCallback, Error, Format, RenderBackend, RenderParams,
    RenderSession, Result,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub const BACKEND_SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="20"><rect width="40" height="20" fill="white"/></svg>"#;
pub const BACKEND_PNG: &[u8] = b"\x89PNG-from-backend";

/// Observable state shared between the backend and its sessions.
#[derive(Default)]
pub struct BackendState {
    pub launches: AtomicUsize,
    pub renders: AtomicUsize,
    pub closes: AtomicUsize,
    pub failing_launches: AtomicUsize,
    pub render_error: Mutex<Option<String>>,
    pub sources: Mutex<Vec<String>>,
    connected: Mutex<Option<Arc<AtomicBool>>>,
    on_disconnect: Mutex<Option<DisconnectCallback>>,
}

impl BackendState {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Simulate the backend going away on its own.
    pub fn disconnect(&self) {
        if let Some(connected) = self.connected.lock().as_ref() {
            connected.store(false, Ordering::SeqCst);
        }
        if let Some(callback) = self.on_disconnect.lock().as_ref() {
            callback();
        }
    }
}

#[derive(Clone)]
pub struct ScriptedBackend {
    pub state: Arc<BackendState>,
    launch_delay: Duration,
    render_delay: Duration,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(BackendState::default()),
            launch_delay: Duration::ZERO,
            render_delay: Duration::ZERO,
        }
    }

    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    pub fn fail_next_launches(&self, count: usize) {
        self.state.failing_launches.store(count, Ordering::SeqCst);
    }

    pub fn fail_renders_with(&self, message: &str) {
        *self.state.render_error.lock() = Some(message.to_string());
    }
}

#[async_trait]
impl RenderBackend for ScriptedBackend {
    async fn launch(
        &self,
        _instance: BackendInstanceId,
        on_disconnect: DisconnectCallback,
    ) -> Result<Arc<dyn RenderSession>> {
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }

        let failing = self.state.failing_launches.load(Ordering::SeqCst);
        if failing > 0 {
            self.state.failing_launches.store(failing - 1, Ordering::SeqCst);
            return Err(Error::BackendLaunch("browser binary not found".to_string()));
        }

        let connected = Arc::new(AtomicBool::new(true));
        *self.state.connected.lock() = Some(Arc::clone(&connected));
        *self.state.on_disconnect.lock() = Some(on_disconnect);

        Ok(Arc::new(ScriptedSession {
            state: Arc::clone(&self.state),
            connected,
            render_delay: self.render_delay,
        }))
    }
}

struct ScriptedSession {
    state: Arc<BackendState>,
    connected: Arc<AtomicBool>,
    render_delay: Duration,
}

#[async_trait]
impl RenderSession for ScriptedSession {
    async fn render(&self, source: &str, format: Format, _params: &RenderParams) -> Result<Vec<u8>> {
        self.state.renders.fetch_add(1, Ordering::SeqCst);
        self.state.sources.lock().push(source.to_string());
        if !self.render_delay.is_zero() {
            tokio::time::sleep(self.render_delay).await;
        }

        if let Some(message) = self.state.render_error.lock().clone() {
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
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
