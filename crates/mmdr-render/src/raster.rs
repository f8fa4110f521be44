//! SVG to PNG conversion with resvg.

use mmdr_core::{Error, Rasterizer, Result};
use resvg::tiny_skia::{Pixmap, Transform};
use resvg::usvg::{self, fontdb};
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// System fonts, loaded once on first rasterization.
static FONTDB: LazyLock<Arc<fontdb::Database>> = LazyLock::new(|| {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    debug!(faces = db.len(), "Loaded system fonts for rasterization");
    Arc::new(db)
});

/// Rasterizes SVG documents at their intrinsic size.
#[derive(Debug, Clone)]
pub struct ResvgRasterizer {
    max_dimension: u32,
}

impl Default for ResvgRasterizer {
    fn default() -> Self {
        Self {
            max_dimension: 16384,
        }
    }
}

impl ResvgRasterizer {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }
}

impl Rasterizer for ResvgRasterizer {
    fn to_raster(&self, svg: &[u8]) -> Result<Vec<u8>> {
        let options = usvg::Options {
            fontdb: FONTDB.clone(),
            ..Default::default()
        };
        let tree = usvg::Tree::from_data(svg, &options)
            .map_err(|e| Error::Rasterize(format!("SVG parse failed: {}", e)))?;

        let size = tree.size().to_int_size();
        let (width, height) = (size.width(), size.height());
        if width == 0 || height == 0 || width > self.max_dimension || height > self.max_dimension {
            return Err(Error::Rasterize(format!(
                "SVG dimensions out of range: {}x{}",
                width, height
            )));
        }

        let mut pixmap = Pixmap::new(width, height)
            .ok_or_else(|| Error::Rasterize(format!("cannot allocate {}x{} pixmap", width, height)))?;
        resvg::render(&tree, Transform::default(), &mut pixmap.as_mut());

        let png = pixmap
            .encode_png()
            .map_err(|e| Error::Rasterize(format!("PNG encoding failed: {}", e)))?;
        debug!(width, height, bytes = png.len(), "Rasterized SVG");
        Ok(png)
    }
}
