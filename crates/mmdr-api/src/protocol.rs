//! Live channel wire format.
//!
//! Every frame is a JSON object tagged by `type`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use mmdr_core::{CacheStatus, Format, RenderOptions, RenderRequest, RenderResult};
use serde::{Deserialize, Serialize};

/// Messages sent by live clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Render(RenderCommand),
    Ping,
}

/// A render command. `format` defaults to PNG.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderCommand {
    #[serde(default)]
    pub mermaid: Option<String>,
    #[serde(flatten)]
    pub options: RenderOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
}

impl RenderCommand {
    pub fn new(mermaid: impl Into<String>, format: Format) -> Self {
        Self {
            mermaid: Some(mermaid.into()),
            options: RenderOptions::default(),
            format: Some(format),
        }
    }

    pub fn format(&self) -> Format {
        self.format.unwrap_or(Format::Png)
    }

    /// Convert into a coordinator request; `None` when there is no source.
    pub fn to_request(&self) -> Option<RenderRequest> {
        let source = self.mermaid.as_deref().filter(|s| !s.trim().is_empty())?;
        Some(RenderRequest::new(source, self.format(), self.options.clone()))
    }
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    RenderResult(RenderReply),
    Pong,
    Error { message: String },
}

/// Stage timings as reported to live clients, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTimings {
    pub render: u64,
    pub derive: u64,
    pub total: u64,
}

/// Outcome of one render command: either an artifact or an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timings: Option<ReplyTimings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub png_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RenderReply {
    pub fn success(result: &RenderResult) -> Self {
        let (png_base64, svg) = match result.format {
            Format::Png => (Some(BASE64.encode(&result.artifact)), None),
            Format::Svg => (None, Some(String::from_utf8_lossy(&result.artifact).into_owned())),
        };
        Self {
            format: Some(result.format),
            cache: Some(result.cache_status),
            cache_key: Some(result.cache_key.to_string()),
            timings: Some(ReplyTimings {
                render: result.timings.render_ms,
                derive: result.timings.derivation_ms,
                total: result.timings.total_ms,
            }),
            width: Some(result.options.width),
            height: Some(result.options.height),
            png_base64,
            svg,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Decoded artifact bytes, if this reply carries one.
    pub fn artifact(&self) -> Option<Vec<u8>> {
        if let Some(svg) = &self.svg {
            return Some(svg.clone().into_bytes());
        }
        self.png_base64
            .as_deref()
            .and_then(|data| BASE64.decode(data).ok())
    }
}
