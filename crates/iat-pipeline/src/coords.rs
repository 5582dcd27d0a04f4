//! Canvas-space ↔ image-space conversion.
//!
//! Pointer events arrive in canvas space (pixels of the composed base
//! layer). Control points are stored in image space (pixels of the
//! full-resolution render layer). All conversions go through
//! [`Viewport`] so the two spaces cannot drift apart.

use serde::{Deserialize, Serialize};

use crate::types::Point;

/// Placement of the render layer's visible window on the canvas.
///
/// `canvas = origin + (image - offset) * scale`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Canvas position of the data layer's top-left corner.
    pub origin: Point,
    /// Image position shown at the data layer's top-left corner.
    pub offset: Point,
    /// Canvas pixels per image pixel.
    pub scale: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            origin: Point::new(0.0, 0.0),
            offset: Point::new(0.0, 0.0),
            scale: 1.0,
        }
    }
}

impl Viewport {
    /// A unit-scale viewport.
    #[must_use]
    pub const fn new(origin: Point, offset: Point) -> Self {
        Self {
            origin,
            offset,
            scale: 1.0,
        }
    }

    /// Map a canvas position to image coordinates.
    #[must_use]
    pub fn canvas_to_image(&self, p: Point) -> Point {
        Point::new(
            (p.x - self.origin.x) / self.scale + self.offset.x,
            (p.y - self.origin.y) / self.scale + self.offset.y,
        )
    }

    /// Map an image position to canvas coordinates.
    #[must_use]
    pub fn image_to_canvas(&self, p: Point) -> Point {
        Point::new(
            (p.x - self.offset.x).mul_add(self.scale, self.origin.x),
            (p.y - self.offset.y).mul_add(self.scale, self.origin.y),
        )
    }

    /// Convert a canvas-space distance (e.g. a hit radius) to image space.
    #[must_use]
    pub fn canvas_distance_to_image(&self, d: f64) -> f64 {
        d / self.scale
    }
}
