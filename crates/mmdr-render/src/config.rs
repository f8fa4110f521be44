//! Configuration for the render pipeline.

use mmdr_core::RenderDefaults;
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on the idle reaper's tick interval.
const MAX_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the coordinator and the shared backend.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Defaults substituted for absent render options.
    pub defaults: RenderDefaults,
    /// Bound on a single backend render call.
    pub render_timeout: Duration,
    /// Bound on launching the backend.
    pub launch_timeout: Duration,
    /// Bound on closing the backend before it is dropped anyway.
    pub close_timeout: Duration,
    /// Reclaim the backend after this much idle time. `None` disables reclamation.
    pub idle_max: Option<Duration>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            defaults: RenderDefaults::default(),
            render_timeout: Duration::from_secs(30),
            launch_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            idle_max: Some(Duration::from_secs(300)),
        }
    }
}

impl RenderConfig {
    pub fn with_defaults(mut self, defaults: RenderDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Set both the render and launch bounds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self.launch_timeout = timeout;
        self
    }

    /// Set the idle window; zero disables reclamation.
    pub fn with_idle_max(mut self, idle_max: Duration) -> Self {
        self.idle_max = (!idle_max.is_zero()).then_some(idle_max);
        self
    }

    /// How often the reaper checks for an idle backend.
    pub fn reap_interval(&self) -> Option<Duration> {
        self.idle_max.map(|idle| idle.min(MAX_REAP_INTERVAL))
    }
}

/// How to start the render worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Extra environment for the worker (e.g. headless mode).
    pub env: Vec<(String, String)>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "node".to_string(),
            args: vec!["worker/render-worker.mjs".to_string()],
            working_dir: None,
            env: vec![],
        }
    }
}

impl WorkerConfig {
    /// Build from a whitespace-separated command line.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            ..Default::default()
        })
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}
