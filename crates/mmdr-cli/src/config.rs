//! Server configuration loading.
//!
//! Sources, lowest precedence first: built-in defaults, an optional file
//! (YAML, TOML, or JSON), then `MMDR_*` environment variables. A `.env` file
//! in the working directory is loaded into the environment first.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use mmdr_api::{ApiConfig, LiveConfig};
use mmdr_cache::CacheConfig;
use mmdr_core::RenderDefaults;
use mmdr_render::{RenderConfig, WorkerConfig};
use mmdr_trace::{LogFormat, TracingConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "MMDR";

/// Flat server configuration, one key per setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub context_path: String,

    pub cache_enabled: bool,
    pub cache_dir: PathBuf,
    pub cache_ttl_ms: u64,

    pub max_request_bytes: usize,
    pub client_cache_enabled: bool,

    pub default_theme: String,
    pub default_background: String,
    pub default_width: u32,
    pub default_height: u32,

    pub render_timeout_ms: u64,
    /// Zero disables idle reclamation.
    pub browser_idle_max_ms: u64,
    pub worker_command: String,
    pub worker_dir: Option<PathBuf>,

    pub ws_idle_close_ms: u64,
    /// Zero disables heartbeat pings.
    pub ws_ping_interval_ms: u64,
    pub ws_max_diagram_chars: usize,
    pub ws_max_frame_bytes: usize,
    pub ws_outbound_queue: usize,
    pub ws_settle_ms: u64,
    pub ws_min_interval_ms: u64,
    pub ws_debug_verbose: bool,

    pub log_format: String,
    pub otlp_endpoint: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            context_path: "/".to_string(),
            cache_enabled: true,
            cache_dir: PathBuf::from("./cache"),
            cache_ttl_ms: 24 * 60 * 60 * 1000,
            max_request_bytes: 10 * 1024 * 1024,
            client_cache_enabled: true,
            default_theme: "default".to_string(),
            default_background: "white".to_string(),
            default_width: 800,
            default_height: 600,
            render_timeout_ms: 30_000,
            browser_idle_max_ms: 300_000,
            worker_command: "node worker/render-worker.mjs".to_string(),
            worker_dir: None,
            ws_idle_close_ms: 120_000,
            ws_ping_interval_ms: 30_000,
            ws_max_diagram_chars: 20_000,
            ws_max_frame_bytes: 64 * 1024,
            ws_outbound_queue: 64,
            ws_settle_ms: 100,
            ws_min_interval_ms: 250,
            ws_debug_verbose: false,
            log_format: "text".to_string(),
            otlp_endpoint: None,
        }
    }
}

impl ServerConfig {
    /// Load from `.env`, an optional file, and the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::load_with(file, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_with(file: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path));
        }
        builder
            .add_source(env.try_parsing(true))
            .build()
            .and_then(|config| config.try_deserialize::<ServerConfig>())
            .context("Invalid server configuration")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn render(&self) -> RenderConfig {
        RenderConfig::default()
            .with_defaults(RenderDefaults {
                theme: self.default_theme.clone(),
                background_color: self.default_background.clone(),
                width: self.default_width,
                height: self.default_height,
            })
            .with_timeout(Duration::from_millis(self.render_timeout_ms))
            .with_idle_max(Duration::from_millis(self.browser_idle_max_ms))
    }

    pub fn cache(&self) -> CacheConfig {
        CacheConfig {
            enabled: self.cache_enabled,
            ttl: Duration::from_millis(self.cache_ttl_ms),
        }
    }

    pub fn api(&self) -> ApiConfig {
        let live = LiveConfig {
            max_diagram_chars: self.ws_max_diagram_chars,
            max_frame_bytes: self.ws_max_frame_bytes,
            outbound_queue: self.ws_outbound_queue,
            debug_verbose: self.ws_debug_verbose,
            ..Default::default()
        }
        .with_idle_close(Duration::from_millis(self.ws_idle_close_ms))
        .with_ping_interval(Duration::from_millis(self.ws_ping_interval_ms))
        .with_cadence(
            Duration::from_millis(self.ws_settle_ms),
            Duration::from_millis(self.ws_min_interval_ms),
        );

        ApiConfig {
            max_request_bytes: self.max_request_bytes,
            client_cache_enabled: self.client_cache_enabled,
            ..Default::default()
        }
        .with_context_path(self.context_path.clone())
        .with_live(live)
    }

    pub fn worker(&self) -> Result<WorkerConfig> {
        let mut worker = WorkerConfig::from_command_line(&self.worker_command)
            .context("worker_command must not be empty")?;
        worker.working_dir = self.worker_dir.clone();
        Ok(worker)
    }

    pub fn tracing(&self) -> Result<TracingConfig> {
        let format: LogFormat = self.log_format.parse()?;
        Ok(TracingConfig::default()
            .with_log_format(format)
            .with_otlp_endpoint(self.otlp_endpoint.clone()))
    }
}
