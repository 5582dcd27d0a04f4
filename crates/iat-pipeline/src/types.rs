//! Shared types for the image alignment toolkit.

use serde::{Deserialize, Serialize};

/// Re-export `RgbaImage` so downstream crates can hand buffers to the
/// `image` ecosystem without depending on `image` directly.
pub use image::RgbaImage;

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// `true` if neither coordinate is NaN or infinite.
    #[must_use]
    pub const fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create a new dimension pair.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Component-wise minimum of two dimension pairs.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        Self {
            width: self.width.min(other.width),
            height: self.height.min(other.height),
        }
    }

    /// Returns `true` if either axis is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Total pixel count (`width * height`).
    #[must_use]
    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// An owned RGBA8 pixel buffer.
///
/// Pixels are stored row-major, four bytes per pixel. The byte length is
/// always `width * height * 4`; every constructor enforces this.
///
/// Buffers are never shared between layers: handing a buffer across a
/// layer boundary clones it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPixelBuffer", into = "RawPixelBuffer")]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

/// Serde-compatible proxy for `PixelBuffer`.
///
/// Deserialization goes through [`PixelBuffer::from_raw`] so a payload
/// with a wrong byte length is rejected instead of producing a buffer
/// that violates the length invariant.
#[derive(Serialize, Deserialize)]
struct RawPixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl TryFrom<RawPixelBuffer> for PixelBuffer {
    type Error = IatError;

    fn try_from(raw: RawPixelBuffer) -> Result<Self, Self::Error> {
        Self::from_raw(raw.width, raw.height, raw.data)
    }
}

impl From<PixelBuffer> for RawPixelBuffer {
    fn from(buffer: PixelBuffer) -> Self {
        Self {
            width: buffer.width,
            height: buffer.height,
            data: buffer.data,
        }
    }
}

impl PixelBuffer {
    /// Bytes per RGBA pixel.
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Fully transparent black.
    pub const TRANSPARENT: [u8; 4] = [0, 0, 0, 0];

    /// Create a zeroed (transparent) buffer.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; Dimensions::new(width, height).pixel_count() * Self::BYTES_PER_PIXEL],
        }
    }

    /// Create a buffer with every pixel set to `rgba`.
    #[must_use]
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let count = Dimensions::new(width, height).pixel_count();
        Self {
            width,
            height,
            data: rgba.repeat(count),
        }
    }

    /// Wrap an existing byte vector.
    ///
    /// # Errors
    ///
    /// Returns [`IatError::Format`] if `data.len() != width * height * 4`.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, IatError> {
        let expected = Dimensions::new(width, height).pixel_count() * Self::BYTES_PER_PIXEL;
        if data.len() != expected {
            return Err(IatError::Format(format!(
                "pixel buffer for {width}x{height} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Width and height as a [`Dimensions`] pair.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// The raw RGBA bytes.
    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the raw RGBA bytes.
    pub fn as_raw_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consume the buffer and return the raw RGBA bytes.
    #[must_use]
    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    /// Byte offset of pixel `(x, y)`, or `None` if out of bounds.
    const fn offset(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some((y as usize * self.width as usize + x as usize) * Self::BYTES_PER_PIXEL)
    }

    /// Read pixel `(x, y)`.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let i = self.offset(x, y)?;
        let px = &self.data[i..i + Self::BYTES_PER_PIXEL];
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Write pixel `(x, y)`. Out-of-bounds writes are ignored.
    pub fn put_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if let Some(i) = self.offset(x, y) {
            self.data[i..i + Self::BYTES_PER_PIXEL].copy_from_slice(&rgba);
        }
    }

    /// Reset every pixel to transparent black.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Copy the `dims`-sized window whose top-left corner is `(x, y)`.
    ///
    /// Parts of the window that fall outside this buffer are transparent.
    #[must_use]
    pub fn crop(&self, x: u32, y: u32, dims: Dimensions) -> Self {
        let mut out = Self::new(dims.width, dims.height);
        if x >= self.width || y >= self.height {
            return out;
        }
        let copy_w = dims.width.min(self.width - x) as usize;
        let row_bytes = copy_w * Self::BYTES_PER_PIXEL;
        let out_stride = dims.width as usize * Self::BYTES_PER_PIXEL;
        for row in 0..dims.height.min(self.height - y) {
            let Some(src) = self.offset(x, y + row) else {
                continue;
            };
            let dst = row as usize * out_stride;
            out.data[dst..dst + row_bytes].copy_from_slice(&self.data[src..src + row_bytes]);
        }
        out
    }

    /// Convert into an `image::RgbaImage` without copying pixel data.
    #[must_use]
    pub fn into_rgba_image(self) -> RgbaImage {
        // Length invariant guarantees `from_raw` succeeds; fall back to an
        // empty image rather than panicking.
        let (w, h) = (self.width, self.height);
        RgbaImage::from_raw(w, h, self.data).unwrap_or_else(|| RgbaImage::new(w, h))
    }
}

impl From<RgbaImage> for PixelBuffer {
    fn from(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
        }
    }
}

/// Toolkit configuration supplied by the host application.
///
/// Missing fields deserialize to their defaults, so a host can override
/// a single knob with e.g. `{"control_point_max": 6}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IatConfig {
    /// Maximum number of control points per panel. Also the number of
    /// correspondences the homography estimator requires.
    pub control_point_max: usize,

    /// Zoom factor for the magnifier loupe.
    pub magnify_zoom: f64,

    /// Default canvas (base layer) width in pixels.
    pub default_width: u32,

    /// Default canvas (base layer) height in pixels.
    pub default_height: u32,

    /// MIME types accepted by the loader.
    pub allowed_formats: Vec<String>,

    /// Half-width of the square used to hit-test existing control points.
    pub hit_radius: f64,
}

impl IatConfig {
    /// Default value for [`control_point_max`](Self::control_point_max).
    pub const DEFAULT_CONTROL_POINT_MAX: usize = 4;

    /// Default value for [`magnify_zoom`](Self::magnify_zoom).
    pub const DEFAULT_MAGNIFY_ZOOM: f64 = 2.0;

    /// Default value for [`default_width`](Self::default_width).
    pub const DEFAULT_WIDTH: u32 = 800;

    /// Default value for [`default_height`](Self::default_height).
    pub const DEFAULT_HEIGHT: u32 = 600;

    /// Default value for [`hit_radius`](Self::hit_radius).
    pub const DEFAULT_HIT_RADIUS: f64 = 20.0;

    /// Default value for [`allowed_formats`](Self::allowed_formats).
    pub const DEFAULT_ALLOWED_FORMATS: [&str; 5] = [
        "image/png",
        "image/jpeg",
        "image/gif",
        "image/bmp",
        "image/tiff",
    ];

    /// Minimum number of correspondences a projective transform needs.
    pub const MIN_CONTROL_POINTS: usize = 4;

    /// Default canvas dimensions as a [`Dimensions`] pair.
    #[must_use]
    pub const fn default_dims(&self) -> Dimensions {
        Dimensions::new(self.default_width, self.default_height)
    }

    /// Returns `true` if `mime` is in [`allowed_formats`](Self::allowed_formats).
    #[must_use]
    pub fn allows(&self, mime: &str) -> bool {
        self.allowed_formats.iter().any(|f| f.eq_ignore_ascii_case(mime))
    }

    /// Check the configuration for values the toolkit cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`IatError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<(), IatError> {
        if self.control_point_max < Self::MIN_CONTROL_POINTS {
            return Err(IatError::InvalidConfig(format!(
                "control_point_max must be at least {}, got {}",
                Self::MIN_CONTROL_POINTS,
                self.control_point_max
            )));
        }
        if !self.magnify_zoom.is_finite() || self.magnify_zoom <= 0.0 {
            return Err(IatError::InvalidConfig(format!(
                "magnify_zoom must be positive, got {}",
                self.magnify_zoom
            )));
        }
        if !self.hit_radius.is_finite() || self.hit_radius <= 0.0 {
            return Err(IatError::InvalidConfig(format!(
                "hit_radius must be positive, got {}",
                self.hit_radius
            )));
        }
        if self.default_dims().is_empty() {
            return Err(IatError::InvalidConfig(format!(
                "default canvas must be non-empty, got {}x{}",
                self.default_width, self.default_height
            )));
        }
        if self.allowed_formats.is_empty() {
            return Err(IatError::InvalidConfig(
                "allowed_formats must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for IatConfig {
    fn default() -> Self {
        Self {
            control_point_max: Self::DEFAULT_CONTROL_POINT_MAX,
            magnify_zoom: Self::DEFAULT_MAGNIFY_ZOOM,
            default_width: Self::DEFAULT_WIDTH,
            default_height: Self::DEFAULT_HEIGHT,
            allowed_formats: Self::DEFAULT_ALLOWED_FORMATS
                .iter()
                .map(ToString::to_string)
                .collect(),
            hit_radius: Self::DEFAULT_HIT_RADIUS,
        }
    }
}

/// Errors reported by the toolkit.
///
/// `Clone` so a panel in the error state can report its last failure
/// again; serde so errors can cross a worker or UI boundary as data.
/// Native decoder errors are kept as their `Display` string for the
/// same reason.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum IatError {
    /// Unrecognized or malformed byte signature or structure.
    #[error("format error: {0}")]
    Format(String),

    /// TIFF compression scheme other than 1 (uncompressed).
    #[error("TIFF compression {0} is not supported")]
    CompressionUnsupported(u16),

    /// Tiled TIFF layout.
    #[error("tiled TIFF images are not supported")]
    TilingUnsupported,

    /// TIFF bit depth other than 8, 16, 24 or 32 bits per pixel.
    #[error("TIFF bit depth {0} is not supported")]
    UnsupportedDepth(u16),

    /// Degenerate linear system (e.g. collinear or repeated points).
    #[error("linear system is singular")]
    SingularSystem,

    /// Not enough correspondence points for an estimate.
    #[error("insufficient control points: need {needed}, got {got}")]
    InsufficientPoints {
        /// Required number of points.
        needed: usize,
        /// Points available.
        got: usize,
    },

    /// The panel already holds the maximum number of control points.
    #[error("maximum of {max} control points reached")]
    MaxControlPointsReached {
        /// Configured maximum.
        max: usize,
    },

    /// A control point coordinate was NaN or infinite.
    #[error("control point coordinates must be finite")]
    NonFinitePoint,

    /// The two images being aligned have incompatible sizes.
    #[error(
        "image dimensions differ: reference {}x{}, moving {}x{}",
        .reference.width, .reference.height, .moving.width, .moving.height
    )]
    MismatchedDimensions {
        /// Source dimensions of the reference image.
        reference: Dimensions,
        /// Source dimensions of the moving image.
        moving: Dimensions,
    },

    /// No image data where some was required.
    #[error("input image data is empty")]
    EmptyInput,

    /// The native decoder rejected the image.
    #[error("failed to decode image: {0}")]
    ImageDecode(String),

    /// Encoding a pixel buffer failed.
    #[error("failed to encode image: {0}")]
    Encode(String),

    /// A load is already in flight for this panel.
    #[error("a load is already in progress")]
    LoadInFlight,

    /// Configuration or argument value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<image::ImageError> for IatError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Encoding(e) => Self::Encode(e.to_string()),
            other => Self::ImageDecode(other.to_string()),
        }
    }
}
