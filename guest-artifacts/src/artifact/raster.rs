use bytes::Bytes;
use resvg::tiny_skia::{Pixmap, Transform};
use resvg::usvg::{Options, Tree};

use crate::artifact::color::Color;
use crate::error::PipelineError;

pub const PNG_MEDIA_TYPE: &str = "image/png";

pub const DEFAULT_RASTER_SIZE: u32 = 512;

/// Converts vector artifacts to PNG for consumers that cannot render SVG.
///
/// The image is scaled to fit within `width` x `height` preserving its aspect
/// ratio, centered, and padded to the exact bounds with `fill` (transparent
/// when unset).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterConverter {
    width: u32,
    height: u32,
    fill: Option<Color>,
}

impl Default for RasterConverter {
    fn default() -> Self {
        Self {
            width: DEFAULT_RASTER_SIZE,
            height: DEFAULT_RASTER_SIZE,
            fill: None,
        }
    }
}

impl RasterConverter {
    pub fn fit(width: u32, height: u32) -> Result<Self, PipelineError> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidArgument(format!(
                "raster bounds must be non-zero, got {width}x{height}"
            )));
        }
        Ok(Self {
            width,
            height,
            fill: None,
        })
    }

    pub fn with_fill(mut self, fill: Option<Color>) -> Self {
        self.fill = fill;
        self
    }

    pub fn bounds(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn to_raster(&self, vector: &[u8]) -> Result<Bytes, PipelineError> {
        let tree = Tree::from_data(vector, &Options::default())
            .map_err(|e| PipelineError::ConversionFailed(format!("unreadable vector image: {e}")))?;

        let mut pixmap = Pixmap::new(self.width, self.height).ok_or_else(|| {
            PipelineError::ConversionFailed(format!(
                "cannot allocate a {}x{} canvas",
                self.width, self.height
            ))
        })?;
        if let Some(fill) = self.fill {
            pixmap.fill(resvg::tiny_skia::Color::from_rgba8(
                fill.r, fill.g, fill.b, 255,
            ));
        }

        let size = tree.size();
        let target_width = self.width as f32;
        let target_height = self.height as f32;
        let scale = (target_width / size.width()).min(target_height / size.height());
        let offset_x = (target_width - size.width() * scale) / 2.0;
        let offset_y = (target_height - size.height() * scale) / 2.0;

        let transform = Transform::from_scale(scale, scale).post_translate(offset_x, offset_y);
        resvg::render(&tree, transform, &mut pixmap.as_mut());

        pixmap
            .encode_png()
            .map(Bytes::from)
            .map_err(|e| PipelineError::ConversionFailed(format!("png encoding failed: {e}")))
    }

    /// Run [`Self::to_raster`] off the async runtime
    pub async fn convert(&self, vector: Bytes) -> Result<Bytes, PipelineError> {
        let converter = *self;
        tokio::task::spawn_blocking(move || converter.to_raster(&vector))
            .await
            .map_err(|e| PipelineError::ConversionFailed(format!("conversion task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::generator::generate;

    /// Reads width and height out of the PNG IHDR chunk
    fn png_dimensions(png: &[u8]) -> (u32, u32) {
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        let width = u32::from_be_bytes([png[16], png[17], png[18], png[19]]);
        let height = u32::from_be_bytes([png[20], png[21], png[22], png[23]]);
        (width, height)
    }

    fn sample_svg() -> Bytes {
        generate(
            "guest-1",
            Color::WHITE,
            Color::BLACK,
            "#336699".parse().unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_to_raster_pads_to_exact_bounds() {
        let converter = RasterConverter::fit(400, 300).unwrap();
        let png = converter.to_raster(&sample_svg()).unwrap();
        assert_eq!(png_dimensions(&png), (400, 300));
    }

    #[test]
    fn test_to_raster_is_deterministic() {
        let converter = RasterConverter::fit(256, 256)
            .unwrap()
            .with_fill(Some(Color::WHITE));
        let svg = sample_svg();
        assert_eq!(
            converter.to_raster(&svg).unwrap(),
            converter.to_raster(&svg).unwrap()
        );
    }

    #[test]
    fn test_malformed_vector_fails_conversion() {
        let converter = RasterConverter::fit(64, 64).unwrap();
        assert!(matches!(
            converter.to_raster(b"definitely not svg"),
            Err(PipelineError::ConversionFailed(_))
        ));
    }

    #[test]
    fn test_zero_bounds_rejected() {
        assert!(RasterConverter::fit(0, 10).is_err());
        assert!(RasterConverter::fit(10, 0).is_err());
    }

    #[tokio::test]
    async fn test_convert_runs_off_runtime() {
        let converter = RasterConverter::fit(128, 128).unwrap();
        let png = converter.convert(sample_svg()).await.unwrap();
        assert_eq!(png_dimensions(&png), (128, 128));
    }
}
