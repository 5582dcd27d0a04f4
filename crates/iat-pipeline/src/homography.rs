//! Projective transform estimation from point correspondences.
//!
//! Four point pairs give eight equations for the eight unknowns of
//!
//! ```text
//! u = (h0*x + h1*y + h2) / (h6*x + h7*y + 1)
//! v = (h3*x + h4*y + h5) / (h6*x + h7*y + 1)
//! ```
//!
//! Cross-multiplying by the denominator makes each pair contribute two
//! linear rows, solved with [`crate::lu`]. With more than four pairs,
//! every 4-subset is solved and scored by its RMSE on the held-out pairs.

use serde::{Deserialize, Serialize};

use crate::lu::LuDecomposition;
use crate::types::{IatConfig, IatError, Point};

/// Denominator magnitude below which a point maps to infinity.
const HORIZON_EPSILON: f64 = 1e-12;

/// An 8-coefficient projective transform (`h8` fixed at 1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Homography {
    coefficients: [f64; 8],
}

impl Homography {
    /// Wrap raw coefficients `h0..h7`.
    #[must_use]
    pub const fn from_coefficients(coefficients: [f64; 8]) -> Self {
        Self { coefficients }
    }

    /// The identity transform.
    #[must_use]
    pub const fn identity() -> Self {
        Self::from_coefficients([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0])
    }

    /// Coefficients `h0..h7`.
    #[must_use]
    pub const fn coefficients(&self) -> &[f64; 8] {
        &self.coefficients
    }

    /// Row-major 3x3 matrix with `h8 = 1`.
    #[must_use]
    pub const fn to_matrix(&self) -> [[f64; 3]; 3] {
        let h = &self.coefficients;
        [[h[0], h[1], h[2]], [h[3], h[4], h[5]], [h[6], h[7], 1.0]]
    }

    /// Map `p` through the transform.
    ///
    /// Returns `None` when `p` lies on (or numerically at) the horizon
    /// line where the denominator vanishes.
    #[must_use]
    pub fn project(&self, p: Point) -> Option<Point> {
        let h = &self.coefficients;
        let w = h[6].mul_add(p.x, h[7] * p.y) + 1.0;
        if w.abs() < HORIZON_EPSILON {
            return None;
        }
        let u = (h[0].mul_add(p.x, h[1] * p.y) + h[2]) / w;
        let v = (h[3].mul_add(p.x, h[4] * p.y) + h[5]) / w;
        (u.is_finite() && v.is_finite()).then_some(Point::new(u, v))
    }

    /// The inverse transform, or `None` if the matrix is singular or the
    /// inverse cannot be normalized to `h8 = 1`.
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        let m = self.to_matrix();
        let det = m[0][0] * m[1][1].mul_add(m[2][2], -(m[1][2] * m[2][1]))
            - m[0][1] * m[1][0].mul_add(m[2][2], -(m[1][2] * m[2][0]))
            + m[0][2] * m[1][0].mul_add(m[2][1], -(m[1][1] * m[2][0]));
        if det.abs() < HORIZON_EPSILON {
            return None;
        }

        // Adjugate; the 1/det factor cancels in the h8 normalization.
        let adj = [
            m[1][1] * m[2][2] - m[1][2] * m[2][1],
            m[0][2] * m[2][1] - m[0][1] * m[2][2],
            m[0][1] * m[1][2] - m[0][2] * m[1][1],
            m[1][2] * m[2][0] - m[1][0] * m[2][2],
            m[0][0] * m[2][2] - m[0][2] * m[2][0],
            m[0][2] * m[1][0] - m[0][0] * m[1][2],
            m[1][0] * m[2][1] - m[1][1] * m[2][0],
            m[0][1] * m[2][0] - m[0][0] * m[2][1],
            m[0][0] * m[1][1] - m[0][1] * m[1][0],
        ];
        let scale = adj[8];
        if scale.abs() < HORIZON_EPSILON {
            return None;
        }
        let mut coefficients = [0.0; 8];
        for (c, a) in coefficients.iter_mut().zip(adj) {
            *c = a / scale;
        }
        Some(Self { coefficients })
    }
}

/// A solved transform and its conditioning signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    /// The fitted transform.
    pub homography: Homography,
    /// [`LuDecomposition::determinant_proxy`] of the 8x8 system. Larger
    /// magnitudes indicate a better-conditioned point configuration.
    pub quality: f64,
}

/// One 4-subset fit scored against the held-out pairs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Indices of the four pairs the transform was fitted to.
    pub indices: [usize; 4],
    /// The fit and its conditioning signal.
    pub estimate: Estimate,
    /// Root-mean-square reprojection error over the other pairs. Zero
    /// when there are no other pairs; infinite if one of them projects
    /// onto the horizon.
    pub rmse: f64,
}

fn check_counts(src: &[Point], dst: &[Point], required: usize) -> Result<usize, IatError> {
    let needed = required.max(IatConfig::MIN_CONTROL_POINTS);
    let got = src.len().min(dst.len());
    if got < needed {
        return Err(IatError::InsufficientPoints { needed, got });
    }
    Ok(got)
}

/// Fit a transform to exactly four pairs.
///
/// # Errors
///
/// Returns [`IatError::SingularSystem`] for degenerate configurations
/// (repeated points, three or more collinear points).
pub fn solve_four(src: &[Point; 4], dst: &[Point; 4]) -> Result<Estimate, IatError> {
    let mut a = [[0.0; 8]; 8];
    let mut b = [0.0; 8];
    for (i, (s, d)) in src.iter().zip(dst).enumerate() {
        let (x, y, u, v) = (s.x, s.y, d.x, d.y);
        a[2 * i] = [x, y, 1.0, 0.0, 0.0, 0.0, -x * u, -y * u];
        b[2 * i] = u;
        a[2 * i + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -x * v, -y * v];
        b[2 * i + 1] = v;
    }
    let lu = LuDecomposition::decompose(&a)?;
    Ok(Estimate {
        homography: Homography::from_coefficients(lu.back_substitute(&b)),
        quality: lu.determinant_proxy(),
    })
}

/// Fit a transform mapping `src` points onto `dst` points using the
/// first four pairs.
///
/// Pairs are matched by index; surplus points on the longer side are
/// ignored.
///
/// # Errors
///
/// Returns [`IatError::InsufficientPoints`] if either side has fewer
/// than `required` points (never less than four).
/// Returns [`IatError::SingularSystem`] for degenerate configurations.
pub fn estimate(src: &[Point], dst: &[Point], required: usize) -> Result<Estimate, IatError> {
    check_counts(src, dst, required)?;
    solve_four(
        &[src[0], src[1], src[2], src[3]],
        &[dst[0], dst[1], dst[2], dst[3]],
    )
}

/// Fit every 4-subset of the pairs and rank them by held-out RMSE,
/// best first.
///
/// Cost grows as C(n, 4), so this is meant for the handful of points a
/// user places by hand. Degenerate subsets are skipped.
///
/// # Errors
///
/// Returns [`IatError::InsufficientPoints`] if either side has fewer
/// than `required` points (never less than four).
/// Returns [`IatError::SingularSystem`] if every subset is degenerate.
pub fn rank_candidates(
    src: &[Point],
    dst: &[Point],
    required: usize,
) -> Result<Vec<Candidate>, IatError> {
    let n = check_counts(src, dst, required)?;

    let mut candidates = Vec::new();
    for indices in subsets_of_four(n) {
        let sub_src = indices.map(|i| src[i]);
        let sub_dst = indices.map(|i| dst[i]);
        match solve_four(&sub_src, &sub_dst) {
            Ok(estimate) => {
                let rmse = held_out_rmse(&estimate.homography, src, dst, &indices);
                candidates.push(Candidate {
                    indices,
                    estimate,
                    rmse,
                });
            }
            Err(err) => tracing::warn!(?indices, %err, "skipping degenerate subset"),
        }
    }

    if candidates.is_empty() {
        return Err(IatError::SingularSystem);
    }
    candidates.sort_by(|a, b| a.rmse.total_cmp(&b.rmse));
    Ok(candidates)
}

/// All ascending 4-index combinations of `0..n`.
fn subsets_of_four(n: usize) -> impl Iterator<Item = [usize; 4]> {
    (0..n).flat_map(move |a| {
        ((a + 1)..n).flat_map(move |b| {
            ((b + 1)..n).flat_map(move |c| ((c + 1)..n).map(move |d| [a, b, c, d]))
        })
    })
}

fn held_out_rmse(h: &Homography, src: &[Point], dst: &[Point], fitted: &[usize; 4]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0_u32;
    for (i, (s, d)) in src.iter().zip(dst).enumerate() {
        if fitted.contains(&i) {
            continue;
        }
        let Some(p) = h.project(*s) else {
            return f64::INFINITY;
        };
        sum += p.distance_squared(*d);
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        (sum / f64::from(count)).sqrt()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn corners(size: f64) -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(size, 0.0),
            Point::new(size, size),
            Point::new(0.0, size),
        ]
    }

    fn map_all(h: &Homography, pts: &[Point]) -> Vec<Point> {
        pts.iter().map(|p| h.project(*p).unwrap()).collect()
    }

    fn assert_coefficients(actual: &Homography, expected: &Homography) {
        for (i, (a, e)) in actual
            .coefficients()
            .iter()
            .zip(expected.coefficients())
            .enumerate()
        {
            let tol = 1e-6 * e.abs().max(1.0);
            assert!((a - e).abs() <= tol, "h{i}: expected {e}, got {a}");
        }
    }

    #[test]
    fn identity_correspondence_gives_identity() {
        let pts = corners(100.0);
        let est = estimate(&pts, &pts, 4).unwrap();
        assert_coefficients(&est.homography, &Homography::identity());
    }

    #[test]
    fn recovers_translation() {
        let src = corners(99.0);
        let dst: Vec<Point> = src.iter().map(|p| Point::new(p.x + 10.0, p.y + 10.0)).collect();
        let est = estimate(&src, &dst, 4).unwrap();
        assert_coefficients(
            &est.homography,
            &Homography::from_coefficients([1.0, 0.0, 10.0, 0.0, 1.0, 10.0, 0.0, 0.0]),
        );
    }

    #[test]
    fn recovers_affine() {
        let truth = Homography::from_coefficients([1.1, 0.2, -4.0, -0.15, 0.95, 7.5, 0.0, 0.0]);
        let src = vec![
            Point::new(10.0, 12.0),
            Point::new(180.0, 20.0),
            Point::new(170.0, 160.0),
            Point::new(15.0, 150.0),
        ];
        let est = estimate(&src, &map_all(&truth, &src), 4).unwrap();
        assert_coefficients(&est.homography, &truth);
    }

    #[test]
    fn recovers_projective() {
        let truth =
            Homography::from_coefficients([1.2, 0.1, 5.0, -0.05, 0.9, 3.0, 0.0005, -0.0003]);
        let src = vec![
            Point::new(0.0, 0.0),
            Point::new(200.0, 10.0),
            Point::new(190.0, 180.0),
            Point::new(5.0, 210.0),
        ];
        let est = estimate(&src, &map_all(&truth, &src), 4).unwrap();
        assert_coefficients(&est.homography, &truth);
    }

    #[test]
    fn too_few_points_is_rejected() {
        let pts = corners(10.0);
        assert_eq!(
            estimate(&pts[..3], &pts, 4),
            Err(IatError::InsufficientPoints { needed: 4, got: 3 })
        );
        assert_eq!(
            estimate(&pts, &pts, 6),
            Err(IatError::InsufficientPoints { needed: 6, got: 4 })
        );
    }

    #[test]
    fn repeated_points_are_singular() {
        let src = vec![Point::new(5.0, 5.0); 4];
        assert_eq!(estimate(&src, &src, 4), Err(IatError::SingularSystem));
    }

    #[test]
    fn three_collinear_points_are_singular() {
        let src = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(20.0, 0.0),
            Point::new(0.0, 10.0),
        ];
        assert_eq!(estimate(&src, &src, 4), Err(IatError::SingularSystem));
    }

    #[test]
    fn quality_is_nonzero_for_well_spread_points() {
        let pts = corners(100.0);
        let est = estimate(&pts, &pts, 4).unwrap();
        assert!(est.quality.abs() > 0.0);
    }

    #[test]
    fn project_returns_none_on_horizon() {
        let h = Homography::from_coefficients([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, -1.0, 0.0]);
        assert!(h.project(Point::new(1.0, 5.0)).is_none());
        assert!(h.project(Point::new(0.5, 5.0)).is_some());
    }

    #[test]
    fn inverse_round_trips() {
        let h = Homography::from_coefficients([1.2, 0.1, 5.0, -0.05, 0.9, 3.0, 0.0005, -0.0003]);
        let inv = h.inverse().unwrap();
        let p = Point::new(42.0, 17.0);
        let back = inv.project(h.project(p).unwrap()).unwrap();
        assert!(back.distance(p) < 1e-9, "got {back:?}");
    }

    #[test]
    fn subsets_enumerate_all_combinations() {
        assert_eq!(subsets_of_four(4).count(), 1);
        assert_eq!(subsets_of_four(6).count(), 15);
        assert_eq!(subsets_of_four(3).count(), 0);
        assert_eq!(subsets_of_four(5).next(), Some([0, 1, 2, 3]));
    }

    #[test]
    fn rank_with_four_points_has_single_zero_rmse_candidate() {
        let pts = corners(50.0);
        let ranked = rank_candidates(&pts, &pts, 4).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].indices, [0, 1, 2, 3]);
        assert!(ranked[0].rmse.abs() < f64::EPSILON);
    }

    #[test]
    fn rank_exact_data_scores_every_subset_near_zero() {
        let truth = Homography::from_coefficients([0.9, -0.1, 12.0, 0.08, 1.05, -6.0, 0.0, 0.0]);
        let src = vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 5.0),
            Point::new(95.0, 110.0),
            Point::new(-3.0, 90.0),
            Point::new(40.0, 37.0),
            Point::new(70.0, 61.0),
        ];
        let ranked = rank_candidates(&src, &map_all(&truth, &src), 4).unwrap();
        assert!(!ranked.is_empty() && ranked.len() <= 15);
        for c in &ranked {
            assert!(c.rmse < 1e-6, "subset {:?} rmse {}", c.indices, c.rmse);
        }
    }

    #[test]
    fn rank_measures_held_out_error() {
        let src = vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 100.0),
            Point::new(0.0, 100.0),
            Point::new(50.0, 30.0),
        ];
        let mut dst = src.clone();
        // Displace the fifth destination point by a 3-4-5 offset.
        dst[4] = Point::new(53.0, 34.0);
        let ranked = rank_candidates(&src, &dst, 4).unwrap();
        let corners_fit = ranked.iter().find(|c| c.indices == [0, 1, 2, 3]).unwrap();
        assert!((corners_fit.rmse - 5.0).abs() < 1e-6);
        // Sorted ascending.
        for pair in ranked.windows(2) {
            assert!(pair[0].rmse <= pair[1].rmse);
        }
    }

    #[test]
    fn rank_all_degenerate_is_singular() {
        let src = vec![Point::new(1.0, 1.0); 5];
        assert_eq!(
            rank_candidates(&src, &src, 4),
            Err(IatError::SingularSystem)
        );
    }
}
