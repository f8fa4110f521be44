//! Cache-first render coordination.
//!
//! Lookup order for a request:
//!
//! 1. exact-format cache entry (`HIT`)
//! 2. for PNG, a cached SVG rasterized locally (`HIT-DERIVED`)
//! 3. a backend render on the shared instance (`MISS`)
//!
//! Cache writes are advisory. Their failures are logged and never change
//! the outcome of the request.

use crate::config::RenderConfig;
use crate::metrics::{LatencyTimer, RenderMetrics};
use crate::resource::ResourceManager;
use mmdr_cache::{ArtifactCache, fingerprint};
use mmdr_core::{
    CacheKey, CacheStatus, Error, Format, NormalizedOptions, Provenance, Rasterizer,
    RenderParams, RenderRequest, RenderResult, ResourceUsage, Result, StageTimings,
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

pub struct RenderCoordinator {
    cache: Arc<ArtifactCache>,
    resources: Arc<ResourceManager>,
    rasterizer: Arc<dyn Rasterizer>,
    config: RenderConfig,
    metrics: Arc<RenderMetrics>,
}

impl RenderCoordinator {
    pub fn new(
        cache: Arc<ArtifactCache>,
        resources: Arc<ResourceManager>,
        rasterizer: Arc<dyn Rasterizer>,
        config: RenderConfig,
    ) -> Self {
        let metrics = Arc::clone(resources.metrics());
        Self {
            cache,
            resources,
            rasterizer,
            config,
            metrics,
        }
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn metrics(&self) -> &Arc<RenderMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Produce the requested artifact, from cache when possible.
    #[instrument(skip_all, fields(format = %request.format))]
    pub async fn convert(&self, request: &RenderRequest) -> Result<RenderResult> {
        let total = LatencyTimer::start();
        if request.source.trim().is_empty() {
            return Err(Error::MissingSource);
        }

        let options = request.options.normalize(&self.config.defaults);
        let key = fingerprint(&request.source, &options);
        let format = request.format;
        let mut timings = StageTimings::default();

        let lookup = LatencyTimer::start();
        let cached = self.cache.get(&key, format).await;
        timings.cache_lookup_ms = lookup.elapsed_ms();

        if let Some(artifact) = cached {
            self.metrics.record_hit();
            timings.total_ms = total.elapsed_ms();
            debug!(cache_key = %key, "Serving from cache");
            return Ok(RenderResult {
                artifact,
                format,
                cache_key: key,
                cache_status: CacheStatus::Hit,
                provenance: Provenance::Cache,
                timings,
                options,
                resource: None,
            });
        }

        if format == Format::Png {
            let lookup = LatencyTimer::start();
            let svg = self.cache.get(&key, Format::Svg).await;
            timings.cache_lookup_ms += lookup.elapsed_ms();

            if let Some(svg) = svg {
                let derive = LatencyTimer::start();
                match self.rasterize(svg).await {
                    Ok(png) => {
                        timings.derivation_ms = derive.elapsed_ms();
                        self.store(&key, format, &png, &options).await;
                        self.metrics.record_derived();
                        timings.total_ms = total.elapsed_ms();
                        info!(cache_key = %key, derivation_ms = timings.derivation_ms, "Derived PNG from cached SVG");
                        return Ok(RenderResult {
                            artifact: png,
                            format,
                            cache_key: key,
                            cache_status: CacheStatus::HitDerived,
                            provenance: Provenance::CacheDerived,
                            timings,
                            options,
                            resource: None,
                        });
                    }
                    Err(e) => {
                        warn!(cache_key = %key, error = %e, "Cached SVG could not be rasterized; rendering instead");
                    }
                }
            }
        }

        self.metrics.record_miss();
        let render = LatencyTimer::start();
        let (artifact, usage) = match self.render(request, &options).await {
            Ok(rendered) => rendered,
            Err(e) => {
                self.metrics.record_render_failure();
                error!(cache_key = %key, error = %e, "Render failed");
                return Err(Error::render_failed(format.describe(), &e));
            }
        };
        timings.render_ms = render.elapsed_ms();
        self.metrics.record_render();

        self.store(&key, format, &artifact, &options).await;
        timings.total_ms = total.elapsed_ms();

        info!(
            cache_key = %key,
            render_ms = timings.render_ms,
            fresh_backend = usage.freshly_created,
            "Rendered diagram"
        );
        Ok(RenderResult {
            artifact,
            format,
            cache_key: key,
            cache_status: CacheStatus::Miss,
            provenance: Provenance::Backend,
            timings,
            options,
            resource: Some(usage),
        })
    }

    async fn render(
        &self,
        request: &RenderRequest,
        options: &NormalizedOptions,
    ) -> Result<(Vec<u8>, ResourceUsage)> {
        let lease = self.resources.acquire().await?;
        let params = RenderParams::from(options);
        let timeout = self.config.render_timeout;

        let rendered = tokio::time::timeout(
            timeout,
            lease.session().render(&request.source, request.format, &params),
        )
        .await;
        lease.mark_used();

        let artifact = rendered.map_err(|_| Error::RenderTimeout {
            timeout_ms: timeout.as_millis() as u64,
        })??;
        if artifact.is_empty() {
            return Err(Error::Internal("backend returned an empty artifact".to_string()));
        }
        Ok((artifact, lease.usage()))
    }

    async fn rasterize(&self, svg: Vec<u8>) -> Result<Vec<u8>> {
        let rasterizer = Arc::clone(&self.rasterizer);
        tokio::task::spawn_blocking(move || rasterizer.to_raster(&svg))
            .await
            .map_err(|e| Error::Internal(format!("rasterizer task failed: {}", e)))?
    }

    async fn store(&self, key: &CacheKey, format: Format, artifact: &[u8], options: &NormalizedOptions) {
        if let Err(e) = self.cache.put(key, format, artifact, options).await {
            warn!(cache_key = %key, %format, error = %e, "Failed to save to cache");
        }
    }
}
