//! Inverse-mapped, nearest-neighbour image warping.
//!
//! The transform maps *destination* coordinates to *source*
//! coordinates: every destination pixel looks up the source pixel it
//! lands on. Rows are independent and the result is deterministic.

use crate::homography::Homography;
use crate::types::{Dimensions, PixelBuffer, Point};

/// Resample `src` into `dst` through `h`.
///
/// Destination pixels whose preimage falls outside `src` (or on the
/// horizon line) are written as transparent black.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn warp(h: &Homography, src: &PixelBuffer, dst: &mut PixelBuffer) {
    let stride = dst.width() as usize * PixelBuffer::BYTES_PER_PIXEL;
    if stride == 0 {
        return;
    }
    let src_w = f64::from(src.width());
    let src_h = f64::from(src.height());

    for (y, row) in (0u32..).zip(dst.as_raw_mut().chunks_exact_mut(stride)) {
        for (x, px) in (0u32..).zip(row.chunks_exact_mut(PixelBuffer::BYTES_PER_PIXEL)) {
            let sample = h
                .project(Point::new(f64::from(x), f64::from(y)))
                .map(|p| (p.x.round(), p.y.round()))
                .filter(|&(u, v)| u >= 0.0 && v >= 0.0 && u < src_w && v < src_h)
                .and_then(|(u, v)| src.pixel(u as u32, v as u32));
            px.copy_from_slice(&sample.unwrap_or(PixelBuffer::TRANSPARENT));
        }
    }
}

/// Allocate a zeroed `dims` buffer and [`warp`] `src` into it.
#[must_use]
pub fn warp_into(h: &Homography, src: &PixelBuffer, dims: Dimensions) -> PixelBuffer {
    let mut dst = PixelBuffer::new(dims.width, dims.height);
    warp(h, src, &mut dst);
    dst
}
