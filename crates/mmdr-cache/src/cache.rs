//! TTL-aware artifact cache on top of an [`ArtifactStore`].
//!
//! Layout per entry: `<key>.<fmt>` holds the artifact and
//! `<key>.<fmt>.meta.json` holds its [`CacheEntryMeta`]. Each (key, format)
//! pair has its own metadata record, so writing the PNG variant never
//! refreshes the SVG variant's age.

use crate::provider::ArtifactStore;
use crate::types::{CacheEntryMeta, CacheStats, FileCounts};
use chrono::Utc;
use mmdr_core::{CacheKey, Format, NormalizedOptions, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const META_SUFFIX: &str = ".meta.json";

/// Cache behaviour switches.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// When disabled every lookup misses and every write is a no-op.
    pub enabled: bool,
    /// Entries older than this are treated as absent.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Persistent key -> artifact store with TTL invalidation.
///
/// The cache is advisory: every lookup failure is reported as a miss and
/// callers must be able to produce a correct result with an empty cache.
pub struct ArtifactCache {
    store: Arc<dyn ArtifactStore>,
    config: CacheConfig,
}

impl ArtifactCache {
    pub fn new(store: Arc<dyn ArtifactStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    pub fn location(&self) -> String {
        self.store.location()
    }

    fn artifact_name(key: &CacheKey, format: Format) -> String {
        format!("{}.{}", key, format.as_str())
    }

    fn meta_name(key: &CacheKey, format: Format) -> String {
        format!("{}.{}{}", key, format.as_str(), META_SUFFIX)
    }

    /// Fetch a live artifact. Missing metadata, missing bytes, expiry, and
    /// storage errors are all reported as `None`.
    pub async fn get(&self, key: &CacheKey, format: Format) -> Option<Vec<u8>> {
        if !self.config.enabled {
            return None;
        }

        let meta = match self.store.read(&Self::meta_name(key, format)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                debug!(cache_key = %key, %format, error = %e, "Cache metadata unreadable");
                return None;
            }
        };

        let meta: CacheEntryMeta = match serde_json::from_slice(&meta) {
            Ok(meta) => meta,
            Err(e) => {
                debug!(cache_key = %key, %format, error = %e, "Cache metadata corrupt");
                return None;
            }
        };

        if meta.is_expired(Utc::now(), self.config.ttl) {
            debug!(cache_key = %key, %format, "Cache entry expired");
            return None;
        }

        match self.store.read(&Self::artifact_name(key, format)).await {
            Ok(Some(artifact)) => {
                debug!(cache_key = %key, %format, bytes = artifact.len(), "Cache hit");
                Some(artifact)
            }
            Ok(None) => None,
            Err(e) => {
                debug!(cache_key = %key, %format, error = %e, "Cached artifact unreadable");
                None
            }
        }
    }

    /// Store an artifact with a fresh metadata record, overwriting any
    /// previous entry for the pair.
    ///
    /// Callers treat the error as advisory: log it and carry on.
    pub async fn put(
        &self,
        key: &CacheKey,
        format: Format,
        artifact: &[u8],
        options: &NormalizedOptions,
    ) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        // Artifact first: metadata must never point at bytes that are not there.
        self.store
            .write(&Self::artifact_name(key, format), artifact)
            .await?;

        let meta = CacheEntryMeta::new(key.clone(), format, options.clone());
        let meta = serde_json::to_vec(&meta)?;
        self.store.write(&Self::meta_name(key, format), &meta).await?;

        debug!(cache_key = %key, %format, bytes = artifact.len(), "Cached artifact");
        Ok(())
    }

    /// Count stored files by kind.
    pub async fn stats(&self) -> Result<CacheStats> {
        let names = self.store.list().await?;
        let mut files = FileCounts {
            total: names.len(),
            ..Default::default()
        };

        for name in &names {
            if name.ends_with(META_SUFFIX) {
                files.meta += 1;
            } else if name.ends_with(".svg") {
                files.svg += 1;
            } else if name.ends_with(".png") {
                files.png += 1;
            }
        }

        Ok(CacheStats {
            enabled: self.config.enabled,
            directory: self.store.location(),
            ttl: self.config.ttl.as_millis() as u64,
            files,
        })
    }

    /// Remove every entry.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await?;
        info!(directory = %self.store.location(), "Cache cleared");
        Ok(())
    }

    /// Remove all format variants of a key. Returns the removed entry names;
    /// an empty list means nothing was cached under the key.
    pub async fn delete(&self, key: &CacheKey) -> Result<Vec<String>> {
        let mut removed = vec![];
        for format in Format::ALL {
            for name in [Self::artifact_name(key, format), Self::meta_name(key, format)] {
                if self.store.delete(&name).await? {
                    removed.push(name);
                }
            }
        }

        if !removed.is_empty() {
            info!(cache_key = %key, removed = removed.len(), "Cache entry deleted");
        }
        Ok(removed)
    }
}
