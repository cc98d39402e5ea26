use std::io::Cursor;

use anyhow::{Context, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat};

/// Longest side sent to the model.
pub const MAX_DIMENSION: u32 = 1024;

pub const JPEG_MIME: &str = "image/jpeg";

/// Decodes any supported image, shrinks it to fit `MAX_DIMENSION` on both
/// axes (aspect ratio preserved, never enlarged) and re-encodes it as JPEG.
pub fn prepare_image(bytes: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).context("unreadable image")?;

    let (width, height) = img.dimensions();
    let img = if width > MAX_DIMENSION || height > MAX_DIMENSION {
        img.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Lanczos3)
    } else {
        img
    };

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Jpeg)
        .context("failed to encode JPEG")?;
    Ok(out.into_inner())
}
