//! Transport configuration.

use std::time::Duration;

/// HTTP surface configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Prefix under which every route is mounted.
    pub context_path: String,
    /// Cap on request bodies.
    pub max_request_bytes: usize,
    /// Send `Cache-Control` on GET renders so browsers may reuse them.
    pub client_cache_enabled: bool,
    pub live: LiveConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            context_path: "/".to_string(),
            max_request_bytes: 10 * 1024 * 1024,
            client_cache_enabled: true,
            live: LiveConfig::default(),
        }
    }
}

impl ApiConfig {
    pub fn with_context_path(mut self, context_path: impl Into<String>) -> Self {
        self.context_path = context_path.into();
        self
    }

    pub fn with_live(mut self, live: LiveConfig) -> Self {
        self.live = live;
        self
    }

    /// Context path without a trailing slash; empty for the root.
    pub fn route_prefix(&self) -> String {
        let trimmed = self.context_path.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        }
    }

    /// Absolute path of a route under the context path.
    pub fn route(&self, path: &str) -> String {
        let prefix = self.route_prefix();
        match (prefix.is_empty(), path) {
            (true, _) => path.to_string(),
            (false, "/") => prefix,
            (false, _) => format!("{}{}", prefix, path),
        }
    }
}

/// Live channel configuration.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Terminate sessions without inbound messages for longer than this.
    pub idle_close: Option<Duration>,
    /// Ping period. `None` disables heartbeat pings.
    pub ping_interval: Option<Duration>,
    pub max_diagram_chars: usize,
    pub max_frame_bytes: usize,
    /// Frames queued per session before a peer that stops reading is dropped.
    pub outbound_queue: usize,
    /// Inbound quiet period before a pending render starts.
    pub settle: Duration,
    /// Minimum spacing between render starts within one session.
    pub min_interval: Duration,
    /// Log every frame.
    pub debug_verbose: bool,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            idle_close: Some(Duration::from_secs(120)),
            ping_interval: Some(Duration::from_secs(30)),
            max_diagram_chars: 20_000,
            max_frame_bytes: 64 * 1024,
            outbound_queue: 64,
            settle: Duration::from_millis(100),
            min_interval: Duration::from_millis(250),
            debug_verbose: false,
        }
    }
}

impl LiveConfig {
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    pub fn with_idle_close(mut self, idle: Duration) -> Self {
        self.idle_close = (!idle.is_zero()).then_some(idle);
        self
    }

    pub fn with_cadence(mut self, settle: Duration, min_interval: Duration) -> Self {
        self.settle = settle;
        self.min_interval = min_interval;
        self
    }

    /// Period of the heartbeat sweep. Sweeps still run for idle
    /// detection when probing is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.ping_interval
            .or_else(|| self.idle_close.map(|idle| idle.min(Duration::from_secs(30))))
    }
}
