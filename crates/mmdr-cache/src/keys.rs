//! Cache key generation utilities.

use mmdr_core::{CacheKey, NormalizedOptions};
use sha2::{Digest, Sha256};

/// Fingerprint a diagram source together with its normalized options.
///
/// SHA-256 over the raw source followed by the canonical JSON encoding of the
/// options. Never rejects input: malformed source is hashed as-is.
pub fn fingerprint(source: &str, options: &NormalizedOptions) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(options.canonical_json().as_bytes());
    CacheKey::from_digest(hex::encode(hasher.finalize()))
}

/// Sanitize a store entry name for use as a filename.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
