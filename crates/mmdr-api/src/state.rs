//! Application state shared across handlers.

use crate::config::ApiConfig;
use crate::session::SessionRegistry;
use mmdr_render::RenderCoordinator;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RenderCoordinator>,
    pub sessions: Arc<SessionRegistry>,
    pub config: ApiConfig,
}

impl AppState {
    pub fn new(coordinator: Arc<RenderCoordinator>, config: ApiConfig) -> Self {
        Self {
            coordinator,
            sessions: Arc::new(SessionRegistry::new()),
            config,
        }
    }

    /// Start the idle reaper and the live heartbeat. Both stop when
    /// `shutdown` flips to true.
    pub fn spawn_background(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut tasks = vec![];

        if let Some(reaper) = self
            .coordinator
            .resources()
            .spawn_idle_reaper(shutdown.clone())
        {
            tasks.push(reaper);
        }

        let live = &self.config.live;
        if let Some(period) = live.sweep_interval() {
            tasks.push(self.sessions.spawn_heartbeat(
                period,
                live.idle_close,
                live.ping_interval.is_some(),
                shutdown,
            ));
        }
        tasks
    }
}
