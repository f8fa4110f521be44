//! Persistent artifact cache for mmdr (filesystem backed).

pub mod cache;
pub mod keys;
pub mod provider;
pub mod types;

pub use cache::{ArtifactCache, CacheConfig};
pub use keys::{fingerprint, sanitize_name};
pub use provider::{ArtifactStore, FilesystemStore, MemoryStore};
pub use types::{CacheEntryMeta, CacheStats, FileCounts};
