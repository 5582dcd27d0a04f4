//! iat-pipeline: image alignment core (sans-IO).
//!
//! Loads raw image bytes (with a built-in decoder for uncompressed
//! TIFF), keeps per-panel layered pixel buffers behind a load state
//! machine, collects paired control points, and warps one image onto
//! another with a homography fitted to those points.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! byte slices. Fetching bytes is delegated to a host-supplied
//! [`ByteFetcher`]; persisting encoded output is the caller's job.

pub mod aligner;
pub mod canvas;
pub mod control_points;
pub mod coords;
pub mod decode;
pub mod encode;
pub mod homography;
pub mod layers;
pub mod lu;
pub mod panel;
pub mod sniff;
pub mod tiff;
pub mod types;
pub mod warp;

pub use aligner::{Aligner, AlignmentReport};
pub use canvas::{Canvas, LoadState, OpOutput, PanelOp};
pub use control_points::{ControlPointManager, Selection};
pub use encode::SaveFormat;
pub use homography::{Candidate, Estimate, Homography};
pub use panel::{
    ByteFetcher, FetchedImage, ImageSource, LoadOutcome, LoadTicket, Panel, PanelController,
    PointerEvent,
};
pub use sniff::ImageFormat;
pub use types::{Dimensions, IatConfig, IatError, PixelBuffer, Point};

/// Align two encoded images in one call.
///
/// Loads `reference` and `moving` into a fresh [`Aligner`], places the
/// paired control points (image coordinates, matched by index), aligns,
/// and returns the report together with the warped moving image.
///
/// # Errors
///
/// Returns [`IatError::InvalidConfig`] if `config` is invalid.
/// Returns any decode error for either image.
/// Returns [`IatError::MaxControlPointsReached`] if more points are
/// given than `config.control_point_max`.
/// Returns [`IatError::NonFinitePoint`] for a NaN or infinite point.
/// Returns the [`Aligner::align`] errors. A point within
/// `config.hit_radius` of an earlier one on the same image selects that
/// point instead of adding one, so such an image ends up one point
/// short and alignment fails with [`IatError::InsufficientPoints`].
pub fn align(
    reference: &[u8],
    moving: &[u8],
    reference_points: &[Point],
    moving_points: &[Point],
    config: &IatConfig,
) -> Result<(AlignmentReport, PixelBuffer), IatError> {
    let mut aligner = Aligner::new(config.clone())?;
    load_with_points(aligner.reference_mut(), reference, reference_points)?;
    load_with_points(aligner.moving_mut(), moving, moving_points)?;
    let report = aligner.align()?;
    Ok((report, aligner.moving().render().clone()))
}

fn load_with_points(
    panel: &mut PanelController,
    bytes: &[u8],
    points: &[Point],
) -> Result<(), IatError> {
    let ticket = panel.begin_load()?;
    let fetched = FetchedImage {
        bytes: bytes.to_vec(),
        filename: None,
    };
    panel.complete_load(ticket, Ok(fetched))?;
    for &p in points {
        panel.place_point(p)?;
    }
    Ok(())
}
