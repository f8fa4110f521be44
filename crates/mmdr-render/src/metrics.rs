//! Counters for render pipeline observability.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics for the render pipeline.
#[derive(Debug, Default)]
pub struct RenderMetrics {
    /// Requests answered from the exact-format cache.
    pub cache_hits: AtomicU64,
    /// Raster requests answered by rasterizing a cached SVG.
    pub derived_hits: AtomicU64,
    /// Requests that needed the backend.
    pub cache_misses: AtomicU64,
    /// Successful backend renders.
    pub renders: AtomicU64,
    /// Failed backend renders.
    pub render_failures: AtomicU64,
    /// Backend launches.
    pub launches: AtomicU64,
    /// Backend launch failures.
    pub launch_failures: AtomicU64,
    /// Backends reclaimed by the idle reaper.
    pub idle_reclaims: AtomicU64,
    /// Duration of the most recent successful launch.
    pub last_startup_ms: AtomicU64,
}

impl RenderMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_derived(&self) {
        self.derived_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_render(&self) {
        self.renders.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_render_failure(&self) {
        self.render_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_launch(&self, startup_ms: u64) {
        self.launches.fetch_add(1, Ordering::Relaxed);
        self.last_startup_ms.store(startup_ms, Ordering::Relaxed);
    }

    pub fn record_launch_failure(&self) {
        self.launch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idle_reclaim(&self) {
        self.idle_reclaims.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            derived_hits: self.derived_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            renders: self.renders.load(Ordering::Relaxed),
            render_failures: self.render_failures.load(Ordering::Relaxed),
            launches: self.launches.load(Ordering::Relaxed),
            launch_failures: self.launch_failures.load(Ordering::Relaxed),
            idle_reclaims: self.idle_reclaims.load(Ordering::Relaxed),
            last_startup_ms: self.last_startup_ms.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub derived_hits: u64,
    pub cache_misses: u64,
    pub renders: u64,
    pub render_failures: u64,
    pub launches: u64,
    pub launch_failures: u64,
    pub idle_reclaims: u64,
    pub last_startup_ms: u64,
}

/// Timer for measuring stage latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
