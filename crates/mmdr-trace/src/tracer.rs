//! Subscriber initialization and configuration.

use opentelemetry::trace::TracerProvider;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource, runtime,
    trace::{RandomIdGenerator, Sampler},
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
pub enum TracerError {
    #[error("Failed to initialize tracer: {0}")]
    Init(String),
    #[error("Unknown log format: {0}")]
    Format(String),
}

/// Layout of log lines on stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = TracerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(TracerError::Format(other.to_string())),
        }
    }
}

/// OTLP exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtlpConfig {
    pub endpoint: String,
    pub timeout_seconds: u64,
}

impl Default for OtlpConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4317".to_string(),
            timeout_seconds: 10,
        }
    }
}

/// Tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    pub service_name: String,
    pub service_version: String,
    pub log_format: LogFormat,
    /// Fallback filter when `RUST_LOG` is unset.
    pub default_filter: String,
    pub sample_rate: f64,
    pub otlp: Option<OtlpConfig>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "mmdr".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_format: LogFormat::Pretty,
            default_filter: "info".to_string(),
            sample_rate: 1.0,
            otlp: None,
        }
    }
}

impl TracingConfig {
    pub fn with_log_format(mut self, log_format: LogFormat) -> Self {
        self.log_format = log_format;
        self
    }

    /// Export spans to the given collector; an empty endpoint disables export.
    pub fn with_otlp_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.otlp = endpoint.filter(|e| !e.trim().is_empty()).map(|endpoint| OtlpConfig {
            endpoint,
            ..Default::default()
        });
        self
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }

    fn sampler(&self) -> Sampler {
        if self.sample_rate >= 1.0 {
            Sampler::AlwaysOn
        } else if self.sample_rate <= 0.0 {
            Sampler::AlwaysOff
        } else {
            Sampler::TraceIdRatioBased(self.sample_rate)
        }
    }
}

/// Install the global subscriber.
pub fn init_tracer(config: &TracingConfig) -> Result<(), TracerError> {
    let fmt_layer = match config.log_format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer().with_target(true).boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
    };

    let registry = tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer);

    match &config.otlp {
        Some(otlp) => {
            let tracer = build_otlp_tracer(config, otlp)?;
            registry
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()
                .map_err(|e| TracerError::Init(e.to_string()))
        }
        None => registry
            .try_init()
            .map_err(|e| TracerError::Init(e.to_string())),
    }
}

fn build_otlp_tracer(
    config: &TracingConfig,
    otlp: &OtlpConfig,
) -> Result<opentelemetry_sdk::trace::Tracer, TracerError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otlp.endpoint)
        .with_timeout(std::time::Duration::from_secs(otlp.timeout_seconds))
        .build()
        .map_err(|e| TracerError::Init(e.to_string()))?;

    let resource = Resource::new(vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", config.service_version.clone()),
    ]);

    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(config.sampler())
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    let tracer = provider.tracer("mmdr");
    global::set_tracer_provider(provider);
    Ok(tracer)
}

/// Flush remaining spans.
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}
