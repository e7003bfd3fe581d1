use anyhow::{Context, Result};
use image::ImageFormat;
use std::io::Cursor;

/// Neither thumbnail dimension may exceed this.
pub const MAX_THUMBNAIL_DIM: u32 = 300;

/// All thumbnails are re-encoded as PNG regardless of the upload format.
pub const THUMBNAIL_CONTENT_TYPE: &str = "image/png";

/// Decode uploaded image bytes and produce a PNG thumbnail bounded to
/// 300x300, preserving the source aspect ratio. Images already within the
/// bound are re-encoded without scaling; nothing is ever upscaled.
pub fn render_png_thumbnail(bytes: &[u8]) -> Result<Vec<u8>> {
    let source = image::load_from_memory(bytes).context("failed to decode uploaded image")?;

    let scaled = if source.width() <= MAX_THUMBNAIL_DIM && source.height() <= MAX_THUMBNAIL_DIM {
        source
    } else {
        source.thumbnail(MAX_THUMBNAIL_DIM, MAX_THUMBNAIL_DIM)
    };

    let mut buffer = Cursor::new(Vec::new());
    scaled
        .write_to(&mut buffer, ImageFormat::Png)
        .context("failed to encode thumbnail as PNG")?;

    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_wide_image_bounded_preserving_aspect() {
        let thumb = render_png_thumbnail(&png_bytes(600, 300)).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!(decoded.width(), 300);
        assert_eq!(decoded.height(), 150);
    }

    #[test]
    fn test_tall_image_bounded_preserving_aspect() {
        let thumb = render_png_thumbnail(&png_bytes(200, 800)).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!(decoded.width(), 75);
        assert_eq!(decoded.height(), 300);
    }

    #[test]
    fn test_small_image_not_upscaled() {
        let thumb = render_png_thumbnail(&png_bytes(100, 50)).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!(decoded.width(), 100);
        assert_eq!(decoded.height(), 50);
    }

    #[test]
    fn test_output_is_png() {
        let thumb = render_png_thumbnail(&png_bytes(10, 10)).unwrap();
        assert_eq!(image::guess_format(&thumb).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn test_undecodable_bytes_fail() {
        assert!(render_png_thumbnail(b"not an image").is_err());
    }
}
