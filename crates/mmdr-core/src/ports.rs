//! Port traits (hexagonal architecture).
//!
//! These traits define the boundary between the render pipeline and the
//! external collaborators that do the actual layout and rasterization work.

use crate::ids::BackendInstanceId;
use crate::render::{Format, NormalizedOptions};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Invoked by a backend session when it disconnects without being asked to.
pub type DisconnectCallback = Box<dyn Fn() + Send + Sync>;

/// Viewport handed to the render backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: u32,
}

/// Parameters for a single backend render call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderParams {
    pub viewport: Viewport,
    pub background_color: String,
    pub theme: String,
}

impl From<&NormalizedOptions> for RenderParams {
    fn from(options: &NormalizedOptions) -> Self {
        Self {
            viewport: Viewport {
                width: options.width,
                height: options.height,
                device_scale_factor: 1,
            },
            background_color: options.background_color.clone(),
            theme: options.theme.clone(),
        }
    }
}

/// Factory for the expensive, stateful render backend.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Launch a new backend instance.
    ///
    /// `on_disconnect` must be called if the instance goes away on its own.
    async fn launch(
        &self,
        instance: BackendInstanceId,
        on_disconnect: DisconnectCallback,
    ) -> Result<Arc<dyn RenderSession>>;
}

/// A live backend instance, shared by concurrent renders.
#[async_trait]
pub trait RenderSession: Send + Sync {
    /// Render diagram source to the requested format.
    async fn render(&self, source: &str, format: Format, params: &RenderParams) -> Result<Vec<u8>>;

    /// Close the instance. Errors are reported but the instance is dropped regardless.
    async fn close(&self) -> Result<()>;

    /// Whether the instance still believes it is connected.
    fn is_connected(&self) -> bool;
}

/// Local vector-to-raster conversion. Pure and synchronous.
pub trait Rasterizer: Send + Sync {
    fn to_raster(&self, svg: &[u8]) -> Result<Vec<u8>>;
}
