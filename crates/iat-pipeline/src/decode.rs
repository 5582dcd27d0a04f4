//! Image decoding front-end.
//!
//! Accepts raw image bytes and produces an RGBA [`PixelBuffer`]. TIFF
//! input goes through the in-crate [`tiff`](crate::tiff) decoder; every
//! other format is handed to the `image` crate.

use crate::sniff::{self, ImageFormat};
use crate::tiff;
use crate::types::{IatError, PixelBuffer};

/// A decoded image together with the format it was sniffed as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Format detected from the byte prefix.
    pub format: ImageFormat,
    /// Full-resolution RGBA pixels.
    pub buffer: PixelBuffer,
}

/// Decode raw image bytes into RGBA.
///
/// # Errors
///
/// Returns [`IatError::EmptyInput`] if `bytes` is empty.
/// Returns the [`tiff::decode`] error kinds for TIFF input.
/// Returns [`IatError::ImageDecode`] if the native decoder rejects the
/// data.
pub fn decode_image(bytes: &[u8]) -> Result<DecodedImage, IatError> {
    if bytes.is_empty() {
        return Err(IatError::EmptyInput);
    }

    let format = sniff::sniff(bytes);
    let buffer = if format.is_tiff() {
        tiff::decode(bytes)?
    } else {
        PixelBuffer::from(image::load_from_memory(bytes)?.to_rgba8())
    };
    Ok(DecodedImage { format, buffer })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tiff::tests::{TiffLayout, build_tiff};

    /// Helper: encode an RGBA image as a PNG byte buffer.
    fn encode_png(img: &image::RgbaImage) -> Vec<u8> {
        let mut buf = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buf);
        image::ImageEncoder::write_image(
            encoder,
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgba8,
        )
        .unwrap();
        buf
    }

    #[test]
    fn empty_input_returns_error() {
        assert_eq!(decode_image(&[]), Err(IatError::EmptyInput));
    }

    #[test]
    fn corrupt_bytes_returns_image_decode_error() {
        let result = decode_image(&[0xFF, 0xFE, 0x00, 0x01]);
        assert!(matches!(result, Err(IatError::ImageDecode(_))));
    }

    #[test]
    fn png_decodes_natively() {
        let img = image::RgbaImage::from_fn(17, 31, |x, y| {
            image::Rgba([u8::try_from(x).unwrap(), u8::try_from(y).unwrap(), 7, 255])
        });
        let decoded = decode_image(&encode_png(&img)).unwrap();
        assert_eq!(decoded.format, ImageFormat::Png);
        assert_eq!(decoded.buffer.width(), 17);
        assert_eq!(decoded.buffer.height(), 31);
        assert_eq!(decoded.buffer.pixel(5, 9), Some([5, 9, 7, 255]));
    }

    #[test]
    fn tiff_goes_through_tiff_decoder() {
        let tiff = build_tiff(&TiffLayout::gray8(2, 1, &[30, 60]));
        let decoded = decode_image(&tiff).unwrap();
        assert_eq!(decoded.format, ImageFormat::TiffBe);
        assert_eq!(decoded.buffer.as_raw(), &[30, 30, 30, 255, 60, 60, 60, 255]);
    }

    #[test]
    fn tiff_errors_propagate() {
        let layout = TiffLayout {
            bits: &[12],
            ..TiffLayout::gray8(2, 1, &[0, 0, 0])
        };
        assert_eq!(
            decode_image(&build_tiff(&layout)),
            Err(IatError::UnsupportedDepth(12))
        );
    }
}
