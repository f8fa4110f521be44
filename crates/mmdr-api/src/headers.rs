//! `X-Mermaid-*` diagnostic response headers.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use mmdr_core::RenderResult;

pub const CACHE: &str = "x-mermaid-cache";
pub const CACHE_KEY: &str = "x-mermaid-cache-key";
pub const SOURCE: &str = "x-mermaid-source";
pub const RENDER_TIME: &str = "x-mermaid-render-time-ms";
pub const CACHE_LOOKUP_TIME: &str = "x-mermaid-cache-lookup-ms";
pub const DERIVE_TIME: &str = "x-mermaid-derive-time-ms";
pub const TOTAL_TIME: &str = "x-mermaid-total-time-ms";
pub const PARAMS: &str = "x-mermaid-params";
pub const BROWSER_STARTUP_TIME: &str = "x-mermaid-browser-startup-time-ms";
pub const BROWSER_REUSED: &str = "x-mermaid-browser-reused";

/// Header glossary served on the service description endpoint.
pub const GLOSSARY: [(&str, &str); 10] = [
    ("X-Mermaid-Cache", "HIT, HIT-DERIVED or MISS"),
    ("X-Mermaid-Cache-Key", "Fingerprint of the diagram source and options"),
    ("X-Mermaid-Source", "cache, cache-derived or backend"),
    ("X-Mermaid-Render-Time-ms", "Time spent in the render backend"),
    ("X-Mermaid-Cache-Lookup-ms", "Time spent reading the cache"),
    ("X-Mermaid-Derive-Time-ms", "Time spent rasterizing a cached SVG (when derived)"),
    ("X-Mermaid-Total-Time-ms", "End-to-end handling time"),
    ("X-Mermaid-Params", "Normalized render options as JSON"),
    ("X-Mermaid-Browser-Startup-Time-ms", "Launch time of the render backend (backend renders)"),
    ("X-Mermaid-Browser-Reused", "Whether the shared backend was reused (backend renders)"),
];

fn insert(headers: &mut HeaderMap, name: &'static str, value: impl ToString) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

/// Diagnostic headers describing how a result was produced.
pub fn diagnostics(result: &RenderResult) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let timings = &result.timings;

    insert(&mut headers, CACHE, result.cache_status);
    insert(&mut headers, CACHE_KEY, &result.cache_key);
    insert(&mut headers, SOURCE, result.provenance);
    insert(&mut headers, RENDER_TIME, timings.render_ms);
    insert(&mut headers, CACHE_LOOKUP_TIME, timings.cache_lookup_ms);
    if timings.derivation_ms > 0 {
        insert(&mut headers, DERIVE_TIME, timings.derivation_ms);
    }
    insert(&mut headers, TOTAL_TIME, timings.total_ms);
    insert(&mut headers, PARAMS, result.options.canonical_json());

    if let Some(usage) = result.resource {
        insert(&mut headers, BROWSER_STARTUP_TIME, usage.startup_ms);
        insert(&mut headers, BROWSER_REUSED, !usage.freshly_created);
    }
    headers
}
