//! PNG encoding of rendered projections.
//!
//! The primary image is 16-bit grayscale so the detector dynamic range
//! survives storage; the thumbnail is 8-bit grayscale bounded to a maximum
//! edge length for previews.

use std::io::Cursor;

use image::{DynamicImage, ImageBuffer, ImageFormat, Luma};

use crate::renderer::RawProjection;

/// Default bound on the longest thumbnail edge, in pixels.
pub const DEFAULT_THUMBNAIL_MAX_EDGE: u32 = 256;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Projection buffer does not match {width}x{height}")]
    Dimensions { width: u32, height: u32 },

    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

pub trait ImageCodec: Send + Sync {
    /// Full bit-depth image.
    fn encode_primary(&self, raw: &RawProjection) -> Result<Vec<u8>, CodecError>;

    /// Reduced preview image.
    fn encode_thumbnail(&self, raw: &RawProjection) -> Result<Vec<u8>, CodecError>;
}

#[derive(Debug, Clone, Copy)]
pub struct PngCodec {
    thumbnail_max_edge: u32,
}

impl PngCodec {
    pub fn new(thumbnail_max_edge: u32) -> Self {
        Self {
            thumbnail_max_edge: thumbnail_max_edge.max(1),
        }
    }

    fn to_luma16(raw: &RawProjection) -> Result<DynamicImage, CodecError> {
        let dims = CodecError::Dimensions {
            width: raw.width,
            height: raw.height,
        };
        if raw.width == 0 || raw.height == 0 {
            return Err(dims);
        }
        let buffer: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_raw(raw.width, raw.height, normalize_u16(&raw.pixels))
                .ok_or(dims)?;
        Ok(DynamicImage::ImageLuma16(buffer))
    }
}

impl Default for PngCodec {
    fn default() -> Self {
        Self::new(DEFAULT_THUMBNAIL_MAX_EDGE)
    }
}

impl ImageCodec for PngCodec {
    fn encode_primary(&self, raw: &RawProjection) -> Result<Vec<u8>, CodecError> {
        write_png(&Self::to_luma16(raw)?)
    }

    fn encode_thumbnail(&self, raw: &RawProjection) -> Result<Vec<u8>, CodecError> {
        let image = Self::to_luma16(raw)?;
        let edge = self.thumbnail_max_edge;
        let image = if image.width() > edge || image.height() > edge {
            image.thumbnail(edge, edge)
        } else {
            image
        };
        write_png(&DynamicImage::ImageLuma8(image.to_luma8()))
    }
}

/// Map finite intensities linearly onto `0..=u16::MAX`. Non-finite pixels
/// and flat images map to zero.
fn normalize_u16(pixels: &[f32]) -> Vec<u16> {
    let (min, max) = pixels
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        return vec![0; pixels.len()];
    }
    pixels
        .iter()
        .map(|&v| {
            if v.is_finite() {
                (((v - min) / range) * u16::MAX as f32).round() as u16
            } else {
                0
            }
        })
        .collect()
}

fn write_png(image: &DynamicImage) -> Result<Vec<u8>, CodecError> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}
