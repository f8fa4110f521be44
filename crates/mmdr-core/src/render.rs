//! Render request/result vocabulary.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Vector output, produced only by the render backend.
    Svg,
    /// Raster output, either rendered directly or derived from a cached SVG.
    Png,
}

impl Format {
    pub const ALL: [Format; 2] = [Format::Svg, Format::Png];

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Svg => "svg",
            Format::Png => "png",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Svg => "image/svg+xml",
            Format::Png => "image/png",
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Format::Svg)
    }

    /// Human-readable description used in error context.
    pub fn describe(&self) -> &'static str {
        match self {
            Format::Svg => "mermaid to SVG",
            Format::Png => "mermaid to PNG",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "svg" => Ok(Format::Svg),
            "png" => Ok(Format::Png),
            other => Err(Error::InvalidInput(format!("Unsupported format: {}", other))),
        }
    }
}

/// Render options as supplied by a caller. Absent fields take server defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl RenderOptions {
    /// Substitute defaults for absent, empty, or zero fields.
    pub fn normalize(&self, defaults: &RenderDefaults) -> NormalizedOptions {
        let text = |value: &Option<String>, fallback: &str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(fallback)
                .to_string()
        };
        let size = |value: Option<u32>, fallback: u32| value.filter(|v| *v > 0).unwrap_or(fallback);

        NormalizedOptions {
            theme: text(&self.theme, &defaults.theme),
            background_color: text(&self.background_color, &defaults.background_color),
            width: size(self.width, defaults.width),
            height: size(self.height, defaults.height),
        }
    }
}

/// Fully resolved options. Field order here is the canonical hashing order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedOptions {
    pub theme: String,
    pub background_color: String,
    pub width: u32,
    pub height: u32,
}

impl NormalizedOptions {
    /// Canonical JSON encoding, stable regardless of how the caller ordered fields.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Server-wide option defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderDefaults {
    pub theme: String,
    pub background_color: String,
    pub width: u32,
    pub height: u32,
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            theme: "default".to_string(),
            background_color: "white".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// A single conversion request from any front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub source: String,
    pub format: Format,
    pub options: RenderOptions,
}

impl RenderRequest {
    pub fn new(source: impl Into<String>, format: Format, options: RenderOptions) -> Self {
        Self {
            source: source.into(),
            format,
            options,
        }
    }
}

/// Lowercase hex SHA-256 digest identifying a (source, options) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub const LEN: usize = 64;

    /// Wrap a digest produced by the fingerprint function.
    pub fn from_digest(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CacheKey {
    type Err = Error;

    /// Accepts exactly `^[a-f0-9]{64}$`.
    fn from_str(s: &str) -> Result<Self> {
        let valid = s.len() == Self::LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidCacheKey(s.to_string()))
        }
    }
}

/// How a result was obtained, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheStatus {
    #[serde(rename = "HIT")]
    Hit,
    #[serde(rename = "HIT-DERIVED")]
    HitDerived,
    #[serde(rename = "MISS")]
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::HitDerived => "HIT-DERIVED",
            CacheStatus::Miss => "MISS",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which path produced the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Cache,
    CacheDerived,
    Backend,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Cache => "cache",
            Provenance::CacheDerived => "cache-derived",
            Provenance::Backend => "backend",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage timings in milliseconds. Stages that did not run stay zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTimings {
    pub cache_lookup_ms: u64,
    pub render_ms: u64,
    pub derivation_ms: u64,
    pub total_ms: u64,
}

/// Shared-resource diagnostics attached to backend renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    /// The backend instance was launched for this request.
    pub freshly_created: bool,
    /// Launch duration of the instance that served the request.
    pub startup_ms: u64,
}

/// Output of the render coordinator.
#[derive(Debug, Clone)]
pub struct RenderResult {
    pub artifact: Vec<u8>,
    pub format: Format,
    pub cache_key: CacheKey,
    pub cache_status: CacheStatus,
    pub provenance: Provenance,
    pub timings: StageTimings,
    pub options: NormalizedOptions,
    pub resource: Option<ResourceUsage>,
}
