//! Error types for mmdr.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Input errors
    #[error("Mermaid diagram text is required")]
    MissingSource,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid cache key format: {0}")]
    InvalidCacheKey(String),

    #[error("Payload too large (limit {limit})")]
    PayloadTooLarge { limit: usize },

    // Backend errors
    #[error("Failed to launch render backend: {0}")]
    BackendLaunch(String),

    #[error("Render backend disconnected")]
    BackendDisconnected,

    #[error("Failed to convert {context}: {message}")]
    RenderFailed { context: String, message: String },

    #[error("Render timeout after {timeout_ms}ms")]
    RenderTimeout { timeout_ms: u64 },

    #[error("Rasterization failed: {0}")]
    Rasterize(String),

    // Cache errors
    #[error("Cache error: {0}")]
    Cache(String),

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used by transports to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller supplied missing or invalid data.
    Input,
    /// Render backend, resource, or rasterizer failure.
    Backend,
    /// Storage failure inside the artifact cache.
    Cache,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingSource
            | Error::InvalidInput(_)
            | Error::InvalidCacheKey(_)
            | Error::PayloadTooLarge { .. } => ErrorKind::Input,
            Error::BackendLaunch(_)
            | Error::BackendDisconnected
            | Error::RenderFailed { .. }
            | Error::RenderTimeout { .. }
            | Error::Rasterize(_) => ErrorKind::Backend,
            Error::Cache(_) => ErrorKind::Cache,
            Error::Io(_) | Error::Serialization(_) | Error::Config(_) | Error::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Wrap a backend failure with the description of what was being converted.
    pub fn render_failed(context: impl Into<String>, source: &Error) -> Self {
        let message = match source {
            Error::RenderFailed { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Error::RenderFailed {
            context: context.into(),
            message,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
