//! Logging and tracing setup for mmdr.
//!
//! Structured logs go to stdout in either a human-readable or JSON layout.
//! When an OTLP endpoint is configured, spans are exported as well.

pub mod spans;
pub mod tracer;

pub use spans::{live_session_span, render_span};
pub use tracer::{LogFormat, OtlpConfig, TracerError, TracingConfig, init_tracer, shutdown_tracer};
