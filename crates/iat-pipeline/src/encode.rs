//! Encode pixel buffers for persistence.
//!
//! The core only produces bytes; writing them anywhere is the caller's
//! job.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::tiff::TiffEncoder;
use image::{ExtendedColorType, ImageEncoder};
use serde::{Deserialize, Serialize};

use crate::types::{IatError, PixelBuffer};

/// Output container for [`encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveFormat {
    /// Lossless, keeps alpha.
    #[default]
    Png,
    /// Lossy, alpha is dropped.
    Jpeg,
    /// Uncompressed RGBA.
    Tiff,
}

impl SaveFormat {
    /// MIME type of the encoded output.
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Tiff => "image/tiff",
        }
    }

    /// Conventional file extension, without the dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Tiff => "tif",
        }
    }
}

impl fmt::Display for SaveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Tiff => "tiff",
        })
    }
}

impl FromStr for SaveFormat {
    type Err = IatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "tiff" | "tif" => Ok(Self::Tiff),
            other => Err(IatError::InvalidConfig(format!(
                "unknown save format {other:?} (expected png, jpeg or tiff)"
            ))),
        }
    }
}

/// Map a `0.0..=1.0` quality to the JPEG encoder's `1..=100` scale.
///
/// # Errors
///
/// Returns [`IatError::InvalidConfig`] if `quality` is outside
/// `0.0..=1.0` or not finite.
pub fn jpeg_quality(quality: f64) -> Result<u8, IatError> {
    if !(0.0..=1.0).contains(&quality) {
        return Err(IatError::InvalidConfig(format!(
            "quality must be within 0.0..=1.0, got {quality}"
        )));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let scaled = quality.mul_add(99.0, 1.0).round() as u8;
    Ok(scaled)
}

/// Encode `buffer` as `format`.
///
/// `quality` is only used by JPEG but is validated for every format so
/// a bad value is caught regardless of the format chosen.
///
/// # Errors
///
/// Returns [`IatError::InvalidConfig`] for an out-of-range `quality`.
/// Returns [`IatError::EmptyInput`] for a zero-sized buffer.
/// Returns [`IatError::Encode`] if the encoder fails.
pub fn encode(buffer: &PixelBuffer, format: SaveFormat, quality: f64) -> Result<Vec<u8>, IatError> {
    let jpeg_q = jpeg_quality(quality)?;
    if buffer.dimensions().is_empty() {
        return Err(IatError::EmptyInput);
    }
    let (w, h) = (buffer.width(), buffer.height());

    let mut out = Vec::new();
    let result = match format {
        SaveFormat::Png => {
            PngEncoder::new(&mut out).write_image(buffer.as_raw(), w, h, ExtendedColorType::Rgba8)
        }
        SaveFormat::Jpeg => {
            let rgb: Vec<u8> = buffer
                .as_raw()
                .chunks_exact(PixelBuffer::BYTES_PER_PIXEL)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect();
            JpegEncoder::new_with_quality(&mut out, jpeg_q).write_image(
                &rgb,
                w,
                h,
                ExtendedColorType::Rgb8,
            )
        }
        SaveFormat::Tiff => TiffEncoder::new(Cursor::new(&mut out)).write_image(
            buffer.as_raw(),
            w,
            h,
            ExtendedColorType::Rgba8,
        ),
    };
    result.map_err(|e| IatError::Encode(e.to_string()))?;

    tracing::debug!(%format, width = w, height = h, bytes = out.len(), "encoded image");
    Ok(out)
}
