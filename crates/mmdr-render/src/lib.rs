//! Render pipeline for mmdr: cache-first coordination, a lazily launched
//! shared render backend with idle reclamation, and local rasterization.

pub mod config;
pub mod coordinator;
pub mod metrics;
pub mod process;
pub mod raster;
pub mod resource;

pub use config::{RenderConfig, WorkerConfig};
pub use coordinator::RenderCoordinator;
pub use metrics::{LatencyTimer, MetricsSnapshot, RenderMetrics};
pub use process::WorkerBackend;
pub use raster::ResvgRasterizer;
pub use resource::{Lease, ResourceManager, ResourceStatus};
