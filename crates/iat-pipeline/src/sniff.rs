//! Byte-signature sniffing.
//!
//! Looks at the first four bytes of a buffer and names the container
//! format. Only the TIFF classification is load-bearing: TIFF input is
//! routed to [`crate::tiff`], everything else goes to the native
//! decoder, which does its own format detection.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Container format detected from a byte prefix.
///
/// The two TIFF labels follow the archive's historical reporting table:
/// the `MM` prefix is reported as [`TiffLe`](Self::TiffLe) and the `II`
/// prefix as [`TiffBe`](Self::TiffBe). The decoder reads the real byte
/// order from the header and does not rely on these labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFormat {
    /// Portable Network Graphics.
    Png,
    /// Graphics Interchange Format.
    Gif,
    /// Windows bitmap.
    Bmp,
    /// JPEG/JFIF.
    Jpg,
    /// TIFF with the `4D 4D 00 2A` prefix.
    TiffLe,
    /// TIFF with the `49 49 2A 00` prefix.
    TiffBe,
    /// Anything else, including buffers shorter than four bytes.
    Unknown,
}

const PNG_MAGIC: [u8; 4] = [0x89, 0x50, 0x4E, 0x47];
const GIF_MAGIC: [u8; 4] = [0x47, 0x49, 0x46, 0x38];
const BMP_MAGIC: [u8; 2] = [0x42, 0x4D];
const JPG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];
const TIFF_MM_MAGIC: [u8; 4] = [0x4D, 0x4D, 0x00, 0x2A];
const TIFF_II_MAGIC: [u8; 4] = [0x49, 0x49, 0x2A, 0x00];

impl ImageFormat {
    /// Returns `true` for either TIFF classification.
    #[must_use]
    pub const fn is_tiff(self) -> bool {
        matches!(self, Self::TiffLe | Self::TiffBe)
    }

    /// MIME type used to check the format against
    /// [`IatConfig::allowed_formats`](crate::IatConfig::allowed_formats).
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
            Self::Jpg => "image/jpeg",
            Self::TiffLe | Self::TiffBe => "image/tiff",
            Self::Unknown => "application/octet-stream",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Png => f.write_str("png"),
            Self::Gif => f.write_str("gif"),
            Self::Bmp => f.write_str("bmp"),
            Self::Jpg => f.write_str("jpg"),
            Self::TiffLe => f.write_str("tiff-le"),
            Self::TiffBe => f.write_str("tiff-be"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Classify `bytes` by its leading signature.
///
/// Never fails: short or unrecognized input yields
/// [`ImageFormat::Unknown`].
#[must_use]
pub fn sniff(bytes: &[u8]) -> ImageFormat {
    let Some(head) = bytes.get(..4) else {
        return ImageFormat::Unknown;
    };
    if head == TIFF_MM_MAGIC {
        ImageFormat::TiffLe
    } else if head == TIFF_II_MAGIC {
        ImageFormat::TiffBe
    } else if head.starts_with(&JPG_MAGIC) {
        ImageFormat::Jpg
    } else if head == PNG_MAGIC {
        ImageFormat::Png
    } else if head == GIF_MAGIC {
        ImageFormat::Gif
    } else if head.starts_with(&BMP_MAGIC) {
        ImageFormat::Bmp
    } else {
        ImageFormat::Unknown
    }
}
