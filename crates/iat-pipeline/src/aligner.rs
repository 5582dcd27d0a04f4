//! Two-panel alignment session.
//!
//! The reference panel stays put. The moving panel's image is warped
//! onto the reference frame using the homography fitted to the paired
//! control points.

use serde::{Deserialize, Serialize};

use crate::canvas::PanelOp;
use crate::encode::SaveFormat;
use crate::homography::{self, Candidate, Homography};
use crate::panel::PanelController;
use crate::types::{Dimensions, IatConfig, IatError, Point};
use crate::warp;

/// Outcome of [`Aligner::align`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentReport {
    /// Transform from reference coordinates to the moving image's
    /// original coordinates.
    pub homography: Homography,
    /// Conditioning signal of the chosen fit.
    pub quality: f64,
    /// Every non-degenerate 4-point fit, best first.
    pub candidates: Vec<Candidate>,
    /// Size of the aligned output.
    pub dimensions: Dimensions,
}

/// A reference panel and a moving panel.
#[derive(Debug, Clone)]
pub struct Aligner {
    reference: PanelController,
    moving: PanelController,
}

impl Aligner {
    /// Two fresh panels sharing `config`.
    ///
    /// # Errors
    ///
    /// Returns [`IatError::InvalidConfig`] if `config` is invalid.
    pub fn new(config: IatConfig) -> Result<Self, IatError> {
        Ok(Self {
            reference: PanelController::new("reference", config.clone())?,
            moving: PanelController::new("moving", config)?,
        })
    }

    /// Wrap existing panels.
    #[must_use]
    pub const fn from_panels(reference: PanelController, moving: PanelController) -> Self {
        Self { reference, moving }
    }

    /// The fixed panel.
    #[must_use]
    pub const fn reference(&self) -> &PanelController {
        &self.reference
    }

    /// The fixed panel, for loading and placing points.
    pub const fn reference_mut(&mut self) -> &mut PanelController {
        &mut self.reference
    }

    /// The panel that gets warped.
    #[must_use]
    pub const fn moving(&self) -> &PanelController {
        &self.moving
    }

    /// The panel that gets warped, for loading and placing points.
    pub const fn moving_mut(&mut self) -> &mut PanelController {
        &mut self.moving
    }

    /// Fit the moving image to the reference and install the warped
    /// result as the moving panel's image.
    ///
    /// With more pairs than four, every 4-subset is fitted and the one
    /// with the lowest held-out error wins. The moving panel's points
    /// are carried into the new frame so they keep marking the same
    /// features.
    ///
    /// # Errors
    ///
    /// Returns [`IatError::EmptyInput`] unless both panels are loaded.
    /// Returns [`IatError::MismatchedDimensions`] if the source sizes
    /// differ.
    /// Returns [`IatError::InsufficientPoints`] if either panel has
    /// fewer than `control_point_max` points.
    /// Returns [`IatError::SingularSystem`] for degenerate point sets.
    pub fn align(&mut self) -> Result<AlignmentReport, IatError> {
        if !self.reference.is_loaded() || !self.moving.is_loaded() {
            return Err(IatError::EmptyInput);
        }
        let reference = self.reference.source_dims();
        let moving = self.moving.source_dims();
        if reference != moving {
            return Err(IatError::MismatchedDimensions { reference, moving });
        }

        let required = self.reference.config().control_point_max;
        let candidates =
            homography::rank_candidates(self.reference.points(), self.moving.points(), required)?;
        let best = candidates.first().ok_or(IatError::SingularSystem)?;
        let h = best.estimate.homography;
        let quality = best.estimate.quality;

        let inverse = h.inverse().ok_or(IatError::SingularSystem)?;
        let remapped = self
            .moving
            .points()
            .iter()
            .map(|&p| inverse.project(p))
            .collect::<Option<Vec<Point>>>()
            .ok_or(IatError::SingularSystem)?;

        let aligned = warp::warp_into(&h, self.moving.render(), reference);
        self.moving.install_transformed(aligned, remapped)?;
        self.moving.apply(PanelOp::Redraw)?;
        self.moving.apply(PanelOp::Draw)?;

        tracing::info!(
            pairs = self.reference.points().len(),
            candidates = candidates.len(),
            rmse = best.rmse,
            quality,
            "alignment complete"
        );
        Ok(AlignmentReport {
            homography: h,
            quality,
            candidates,
            dimensions: reference,
        })
    }

    /// Encode the moving panel's current image.
    ///
    /// # Errors
    ///
    /// See [`PanelController::save`].
    pub fn save(&mut self, format: SaveFormat, quality: f64) -> Result<Vec<u8>, IatError> {
        self.moving.save(format, quality)
    }
}
