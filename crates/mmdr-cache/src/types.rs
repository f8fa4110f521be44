//! Cache metadata types.

use chrono::{DateTime, Utc};
use mmdr_core::{CacheKey, Format, NormalizedOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metadata record persisted next to each cached artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntryMeta {
    pub cache_key: CacheKey,
    pub format: Format,
    pub options: NormalizedOptions,
    pub created_at: DateTime<Utc>,
}

impl CacheEntryMeta {
    pub fn new(cache_key: CacheKey, format: Format, options: NormalizedOptions) -> Self {
        Self {
            cache_key,
            format,
            options,
            created_at: Utc::now(),
        }
    }

    /// An entry expires once `now - created_at >= ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return false;
        };
        now.signed_duration_since(self.created_at) >= ttl
    }
}

/// File counts by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCounts {
    pub svg: usize,
    pub png: usize,
    pub meta: usize,
    pub total: usize,
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub directory: String,
    /// TTL in milliseconds.
    pub ttl: u64,
    pub files: FileCounts,
}

impl CacheStats {
    /// Number of artifacts stored for a format.
    pub fn count(&self, format: Format) -> usize {
        match format {
            Format::Svg => self.files.svg,
            Format::Png => self.files.png,
        }
    }
}
