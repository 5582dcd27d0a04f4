//! Uncompressed, strip-organized TIFF decoding.
//!
//! Supports the subset of TIFF the archive produces: one image per file
//! (further pages are counted but not decoded), compression 1, chunky
//! planar configuration, and 8/16/24/32 bits per pixel. Everything is
//! expanded to RGBA8.
//!
//! Decoding steps:
//!
//! 1. Read the 8-byte header (byte order + first IFD offset).
//! 2. Walk the first IFD's 12-byte tag entries into a strip layout.
//! 3. Follow the next-IFD chain only to count pages.
//! 4. Concatenate the strips and expand each row to RGBA.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::sniff;
use crate::types::{IatError, PixelBuffer};

/// Baseline tag numbers read by the decoder.
pub mod tag {
    /// ImageWidth.
    pub const IMAGE_WIDTH: u16 = 256;
    /// ImageLength.
    pub const IMAGE_LENGTH: u16 = 257;
    /// BitsPerSample.
    pub const BITS_PER_SAMPLE: u16 = 258;
    /// Compression.
    pub const COMPRESSION: u16 = 259;
    /// PhotometricInterpretation.
    pub const PHOTOMETRIC: u16 = 262;
    /// StripOffsets.
    pub const STRIP_OFFSETS: u16 = 273;
    /// SamplesPerPixel.
    pub const SAMPLES_PER_PIXEL: u16 = 277;
    /// RowsPerStrip.
    pub const ROWS_PER_STRIP: u16 = 278;
    /// StripByteCounts.
    pub const STRIP_BYTE_COUNTS: u16 = 279;
    /// PlanarConfiguration.
    pub const PLANAR_CONFIGURATION: u16 = 284;
    /// TileWidth.
    pub const TILE_WIDTH: u16 = 322;
    /// TileLength.
    pub const TILE_LENGTH: u16 = 323;
}

/// PhotometricInterpretation: 0 is white.
const PHOTOMETRIC_WHITE_IS_ZERO: u16 = 0;
/// PhotometricInterpretation: 0 is black.
const PHOTOMETRIC_BLACK_IS_ZERO: u16 = 1;
/// PhotometricInterpretation: RGB.
const PHOTOMETRIC_RGB: u16 = 2;

/// Upper bound on IFDs followed while counting pages.
const MAX_PAGES: usize = 4096;

/// Summary of a TIFF file's first image and page chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TiffInfo {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Sum of all BitsPerSample entries.
    pub bits_per_pixel: u16,
    /// SamplesPerPixel (defaults to 1).
    pub samples_per_pixel: u16,
    /// PhotometricInterpretation.
    pub photometric: u16,
    /// Number of IFDs in the chain. Only the first is decoded.
    pub page_count: usize,
    /// `true` for `MM` (big-endian) files.
    pub big_endian: bool,
}

/// Bounds-checked, byte-order-aware reads over the whole file.
struct Reader<'a> {
    bytes: &'a [u8],
    big_endian: bool,
}

impl<'a> Reader<'a> {
    fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8], IatError> {
        offset
            .checked_add(len)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or_else(|| {
                IatError::Format(format!(
                    "read of {len} bytes at offset {offset} exceeds file size {}",
                    self.bytes.len()
                ))
            })
    }

    fn u16_at(&self, offset: usize) -> Result<u16, IatError> {
        let b = self.slice(offset, 2)?;
        let pair = [b[0], b[1]];
        Ok(if self.big_endian {
            u16::from_be_bytes(pair)
        } else {
            u16::from_le_bytes(pair)
        })
    }

    fn u32_at(&self, offset: usize) -> Result<u32, IatError> {
        let b = self.slice(offset, 4)?;
        let quad = [b[0], b[1], b[2], b[3]];
        Ok(if self.big_endian {
            u32::from_be_bytes(quad)
        } else {
            u32::from_le_bytes(quad)
        })
    }
}

/// One 12-byte IFD entry. `value_pos` is the file offset of the 4-byte
/// value/offset field.
#[derive(Debug, Clone, Copy)]
struct Entry {
    tag: u16,
    field_type: u16,
    count: u32,
    value_pos: usize,
}

struct Ifd {
    entries: Vec<Entry>,
    next: u32,
}

impl Ifd {
    fn read(reader: &Reader<'_>, offset: usize) -> Result<Self, IatError> {
        let count = usize::from(reader.u16_at(offset)?);
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let pos = offset + 2 + i * 12;
            entries.push(Entry {
                tag: reader.u16_at(pos)?,
                field_type: reader.u16_at(pos + 2)?,
                count: reader.u32_at(pos + 4)?,
                value_pos: pos + 8,
            });
        }
        let next = reader.u32_at(offset + 2 + count * 12)?;
        Ok(Self { entries, next })
    }

    fn find(&self, tag: u16) -> Option<&Entry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    /// All values of an integer-typed tag, or `None` if absent.
    fn values(&self, reader: &Reader<'_>, tag: u16) -> Result<Option<Vec<u32>>, IatError> {
        let Some(entry) = self.find(tag) else {
            return Ok(None);
        };
        let size = match entry.field_type {
            1 => 1, // BYTE
            3 => 2, // SHORT
            4 => 4, // LONG
            other => {
                return Err(IatError::Format(format!(
                    "tag {tag} has unsupported field type {other}"
                )));
            }
        };
        let count = entry.count as usize;
        let total = count
            .checked_mul(size)
            .ok_or_else(|| IatError::Format(format!("tag {tag} count overflows")))?;
        let base = if total <= 4 {
            entry.value_pos
        } else {
            reader.u32_at(entry.value_pos)? as usize
        };
        // Validate the whole span up front so a bogus count cannot drive a
        // huge allocation.
        reader.slice(base, total)?;
        (0..count)
            .map(|i| {
                let pos = base + i * size;
                match size {
                    1 => reader.slice(pos, 1).map(|b| u32::from(b[0])),
                    2 => reader.u16_at(pos).map(u32::from),
                    _ => reader.u32_at(pos),
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    fn first(&self, reader: &Reader<'_>, tag: u16) -> Result<Option<u32>, IatError> {
        Ok(self
            .values(reader, tag)?
            .and_then(|v| v.first().copied()))
    }
}

/// How strip bytes expand to RGBA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleLayout {
    Gray8,
    Gray16,
    GrayAlpha8,
    Rgb8,
    Rgba8,
}

impl SampleLayout {
    const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::Gray16 | Self::GrayAlpha8 => 2,
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }
}

/// Everything needed to pull pixels out of the first IFD.
struct Layout {
    width: u32,
    height: u32,
    bits_per_pixel: u16,
    samples_per_pixel: u16,
    photometric: u16,
    samples: SampleLayout,
    strip_offsets: Vec<u32>,
    strip_byte_counts: Option<Vec<u32>>,
    rows_per_strip: u32,
}

impl Layout {
    fn from_ifd(reader: &Reader<'_>, ifd: &Ifd) -> Result<Self, IatError> {
        if ifd.find(tag::TILE_WIDTH).is_some() || ifd.find(tag::TILE_LENGTH).is_some() {
            return Err(IatError::TilingUnsupported);
        }

        let compression = ifd.first(reader, tag::COMPRESSION)?.unwrap_or(1);
        if compression != 1 {
            return Err(IatError::CompressionUnsupported(saturate_u16(compression)));
        }

        let planar = ifd.first(reader, tag::PLANAR_CONFIGURATION)?.unwrap_or(1);
        if planar != 1 {
            return Err(IatError::Format(format!(
                "planar configuration {planar} is not supported"
            )));
        }

        let width = ifd
            .first(reader, tag::IMAGE_WIDTH)?
            .ok_or_else(|| IatError::Format("missing ImageWidth tag".to_string()))?;
        let height = ifd
            .first(reader, tag::IMAGE_LENGTH)?
            .ok_or_else(|| IatError::Format("missing ImageLength tag".to_string()))?;
        if width == 0 || height == 0 {
            return Err(IatError::Format(format!(
                "image has empty dimensions {width}x{height}"
            )));
        }

        let bits = ifd
            .values(reader, tag::BITS_PER_SAMPLE)?
            .unwrap_or_else(|| vec![1]);
        let bits_per_pixel = saturate_u16(bits.iter().fold(0, |acc: u32, &b| acc.saturating_add(b)));
        let samples_per_pixel = ifd
            .first(reader, tag::SAMPLES_PER_PIXEL)?
            .map_or_else(
                || saturate_u16(u32::try_from(bits.len()).unwrap_or(u32::MAX)),
                saturate_u16,
            );
        let photometric = saturate_u16(
            ifd.first(reader, tag::PHOTOMETRIC)?
                .unwrap_or(u32::from(PHOTOMETRIC_BLACK_IS_ZERO)),
        );

        let samples = match (bits_per_pixel, samples_per_pixel) {
            (8, _) => SampleLayout::Gray8,
            (16, 2) => SampleLayout::GrayAlpha8,
            (16, _) => SampleLayout::Gray16,
            (24, _) => SampleLayout::Rgb8,
            (32, _) => SampleLayout::Rgba8,
            (other, _) => return Err(IatError::UnsupportedDepth(other)),
        };
        match (samples, photometric) {
            (
                SampleLayout::Gray8 | SampleLayout::Gray16 | SampleLayout::GrayAlpha8,
                PHOTOMETRIC_WHITE_IS_ZERO | PHOTOMETRIC_BLACK_IS_ZERO,
            )
            | (SampleLayout::Rgb8 | SampleLayout::Rgba8, PHOTOMETRIC_RGB) => {}
            (_, other) => {
                return Err(IatError::Format(format!(
                    "photometric interpretation {other} is not supported at {bits_per_pixel} bits"
                )));
            }
        }

        let strip_offsets = ifd
            .values(reader, tag::STRIP_OFFSETS)?
            .ok_or_else(|| IatError::Format("missing StripOffsets tag".to_string()))?;
        let strip_byte_counts = ifd.values(reader, tag::STRIP_BYTE_COUNTS)?;
        let rows_per_strip = ifd
            .first(reader, tag::ROWS_PER_STRIP)?
            .unwrap_or(height)
            .clamp(1, height);

        Ok(Self {
            width,
            height,
            bits_per_pixel,
            samples_per_pixel,
            photometric,
            samples,
            strip_offsets,
            strip_byte_counts,
            rows_per_strip,
        })
    }

    const fn row_bytes(&self) -> usize {
        self.width as usize * self.samples.bytes_per_pixel()
    }

    /// Concatenate strip payloads into one `height * row_bytes` buffer.
    fn read_strips(&self, reader: &Reader<'_>) -> Result<Vec<u8>, IatError> {
        let row_bytes = self.row_bytes();
        let total = row_bytes
            .checked_mul(self.height as usize)
            .filter(|&t| t <= reader.bytes.len())
            .ok_or_else(|| {
                IatError::Format(format!(
                    "{}x{} image cannot fit in a {}-byte file",
                    self.width,
                    self.height,
                    reader.bytes.len()
                ))
            })?;

        let strip_count = self.height.div_ceil(self.rows_per_strip);
        if self.strip_offsets.len() < strip_count as usize {
            return Err(IatError::Format(format!(
                "expected {strip_count} strips, found {} offsets",
                self.strip_offsets.len()
            )));
        }

        let mut raw = Vec::with_capacity(total);
        for (strip, &offset) in (0..strip_count).zip(&self.strip_offsets) {
            let first_row = strip * self.rows_per_strip;
            let rows = self.rows_per_strip.min(self.height - first_row) as usize;
            let needed = rows * row_bytes;
            if let Some(counts) = &self.strip_byte_counts {
                let declared = counts.get(strip as usize).copied().unwrap_or(0) as usize;
                if declared < needed {
                    return Err(IatError::Format(format!(
                        "strip {strip} declares {declared} bytes, needs {needed}"
                    )));
                }
            }
            raw.extend_from_slice(reader.slice(offset as usize, needed)?);
        }
        Ok(raw)
    }
}

fn saturate_u16(v: u32) -> u16 {
    u16::try_from(v).unwrap_or(u16::MAX)
}

fn open(bytes: &[u8]) -> Result<(Reader<'_>, Ifd, usize), IatError> {
    let format = sniff::sniff(bytes);
    if !format.is_tiff() {
        return Err(IatError::Format(format!(
            "expected a TIFF signature, found {format}"
        )));
    }
    let reader = Reader {
        bytes,
        big_endian: bytes.starts_with(b"MM"),
    };
    let first = reader.u32_at(4)? as usize;
    let ifd = Ifd::read(&reader, first)?;
    let pages = count_pages(&reader, first, ifd.next);
    Ok((reader, ifd, pages))
}

/// Follow the next-IFD chain. A broken or cyclic link ends the walk;
/// later pages are never decoded, so they cannot fail the load.
fn count_pages(reader: &Reader<'_>, first: usize, mut next: u32) -> usize {
    let mut seen = HashSet::from([first]);
    let mut pages = 1;
    while next != 0 && pages < MAX_PAGES {
        let offset = next as usize;
        if !seen.insert(offset) {
            break;
        }
        let Ok(ifd) = Ifd::read(reader, offset) else {
            break;
        };
        pages += 1;
        next = ifd.next;
    }
    pages
}

/// Describe a TIFF file without decoding its pixels.
///
/// # Errors
///
/// Same as [`decode`], minus failures that only occur while reading
/// strip data.
pub fn inspect(bytes: &[u8]) -> Result<TiffInfo, IatError> {
    let (reader, ifd, page_count) = open(bytes)?;
    let layout = Layout::from_ifd(&reader, &ifd)?;
    Ok(TiffInfo {
        width: layout.width,
        height: layout.height,
        bits_per_pixel: layout.bits_per_pixel,
        samples_per_pixel: layout.samples_per_pixel,
        photometric: layout.photometric,
        page_count,
        big_endian: reader.big_endian,
    })
}

/// Decode the first image of a TIFF file into RGBA.
///
/// # Errors
///
/// - [`IatError::Format`] if the bytes do not sniff as TIFF, a required
///   tag is missing, or a read runs past the end of the file.
/// - [`IatError::CompressionUnsupported`] for compression other than 1.
/// - [`IatError::TilingUnsupported`] if tile tags are present.
/// - [`IatError::UnsupportedDepth`] for bit depths other than
///   8/16/24/32.
pub fn decode(bytes: &[u8]) -> Result<PixelBuffer, IatError> {
    let (reader, ifd, page_count) = open(bytes)?;
    let layout = Layout::from_ifd(&reader, &ifd)?;
    let raw = layout.read_strips(&reader)?;

    let invert = layout.photometric == PHOTOMETRIC_WHITE_IS_ZERO;
    let rgba = expand(&raw, layout.samples, invert, reader.big_endian);

    tracing::debug!(
        width = layout.width,
        height = layout.height,
        bits_per_pixel = layout.bits_per_pixel,
        page_count,
        big_endian = reader.big_endian,
        "decoded TIFF"
    );
    if page_count > 1 {
        tracing::debug!(page_count, "ignoring additional TIFF pages");
    }

    PixelBuffer::from_raw(layout.width, layout.height, rgba)
}

/// Grey value to RGBA lookup table.
fn grey_lut(invert: bool) -> [[u8; 4]; 256] {
    let mut lut = [[0, 0, 0, 255]; 256];
    for (v, entry) in (0u8..=255).zip(lut.iter_mut()) {
        let g = if invert { 255 - v } else { v };
        *entry = [g, g, g, 255];
    }
    lut
}

fn expand(raw: &[u8], samples: SampleLayout, invert: bool, big_endian: bool) -> Vec<u8> {
    let pixels = raw.len() / samples.bytes_per_pixel();
    let mut out = Vec::with_capacity(pixels * PixelBuffer::BYTES_PER_PIXEL);
    let lut = grey_lut(invert);
    match samples {
        SampleLayout::Gray8 => {
            for &v in raw {
                out.extend_from_slice(&lut[usize::from(v)]);
            }
        }
        SampleLayout::Gray16 => {
            // Keep the most significant byte of each sample.
            let msb = usize::from(!big_endian);
            for px in raw.chunks_exact(2) {
                out.extend_from_slice(&lut[usize::from(px[msb])]);
            }
        }
        SampleLayout::GrayAlpha8 => {
            for px in raw.chunks_exact(2) {
                let [r, g, b, _] = lut[usize::from(px[0])];
                out.extend_from_slice(&[r, g, b, px[1]]);
            }
        }
        SampleLayout::Rgb8 => {
            for px in raw.chunks_exact(3) {
                out.extend_from_slice(&[px[0], px[1], px[2], 255]);
            }
        }
        SampleLayout::Rgba8 => out.extend_from_slice(raw),
    }
    out
}
