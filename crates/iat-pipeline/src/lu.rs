//! Dense LU decomposition for small square systems.
//!
//! Crout's method with partial pivoting and implicit row scaling: each
//! candidate pivot is compared after dividing by its row's largest
//! absolute entry, so badly scaled rows do not dominate pivot choice.
//! The homography estimator uses `N = 8`.

use crate::types::IatError;

/// Scaled pivot magnitude at or below which the system is treated as
/// singular.
const SINGULAR_TOLERANCE: f64 = 1e-12;

/// Divisor applied to each diagonal factor of
/// [`LuDecomposition::determinant_proxy`].
const PROXY_SCALE: f64 = 100.0;

/// Result of decomposing an `N x N` matrix.
///
/// `lu` holds both triangles: the unit-diagonal lower factor below the
/// diagonal and the upper factor on and above it, in pivoted row order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LuDecomposition<const N: usize> {
    lu: [[f64; N]; N],
    pivots: [usize; N],
    sign: f64,
}

impl<const N: usize> LuDecomposition<N> {
    /// Decompose a copy of `a`, leaving the input untouched.
    ///
    /// # Errors
    ///
    /// Returns [`IatError::SingularSystem`] if a row is entirely zero or
    /// no usable pivot exists for some column.
    pub fn decompose(a: &[[f64; N]; N]) -> Result<Self, IatError> {
        let mut lu = *a;
        let (pivots, sign) = decompose_in_place(&mut lu)?;
        Ok(Self { lu, pivots, sign })
    }

    /// The combined L/U factors.
    #[must_use]
    pub const fn lu(&self) -> &[[f64; N]; N] {
        &self.lu
    }

    /// Row interchange recorded for each column.
    #[must_use]
    pub const fn pivots(&self) -> &[usize; N] {
        &self.pivots
    }

    /// `+1.0` for an even number of row interchanges, `-1.0` for odd.
    #[must_use]
    pub const fn sign(&self) -> f64 {
        self.sign
    }

    /// Solve `A x = b` using the stored factors.
    #[must_use]
    pub fn back_substitute(&self, b: &[f64; N]) -> [f64; N] {
        back_substitute(&self.lu, &self.pivots, b)
    }

    /// Product of the diagonal factors, each divided by 100, times the
    /// pivot sign.
    ///
    /// A coarse conditioning signal for ranking candidate systems, not a
    /// determinant: the scaling keeps the product of eight large
    /// homography pivots in a comparable range.
    #[must_use]
    pub fn determinant_proxy(&self) -> f64 {
        (0..N).fold(self.sign, |acc, i| acc * (self.lu[i][i] / PROXY_SCALE))
    }
}

/// Decompose `a` in place, overwriting it with the combined L/U factors.
///
/// Returns the pivot indices and the permutation sign.
///
/// # Errors
///
/// Returns [`IatError::SingularSystem`] if a row is entirely zero or no
/// usable pivot exists for some column. `a` is partially overwritten in
/// that case.
pub fn decompose_in_place<const N: usize>(
    a: &mut [[f64; N]; N],
) -> Result<([usize; N], f64), IatError> {
    let mut scale = [0.0; N];
    for (row, s) in a.iter().zip(scale.iter_mut()) {
        let big = row.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        if big == 0.0 {
            return Err(IatError::SingularSystem);
        }
        *s = 1.0 / big;
    }

    let mut pivots = [0; N];
    let mut sign = 1.0;
    for j in 0..N {
        for i in 0..j {
            let mut sum = a[i][j];
            for k in 0..i {
                sum -= a[i][k] * a[k][j];
            }
            a[i][j] = sum;
        }

        let mut big = 0.0;
        let mut imax = j;
        for i in j..N {
            let mut sum = a[i][j];
            for k in 0..j {
                sum -= a[i][k] * a[k][j];
            }
            a[i][j] = sum;
            let scaled = scale[i] * sum.abs();
            if scaled >= big {
                big = scaled;
                imax = i;
            }
        }

        if j != imax {
            a.swap(j, imax);
            sign = -sign;
            scale[imax] = scale[j];
        }
        pivots[j] = imax;

        if big <= SINGULAR_TOLERANCE {
            return Err(IatError::SingularSystem);
        }

        let inv = 1.0 / a[j][j];
        for row in a.iter_mut().skip(j + 1) {
            row[j] *= inv;
        }
    }
    Ok((pivots, sign))
}

/// Forward then backward substitution against factors from
/// [`decompose_in_place`].
#[must_use]
pub fn back_substitute<const N: usize>(
    lu: &[[f64; N]; N],
    pivots: &[usize; N],
    b: &[f64; N],
) -> [f64; N] {
    let mut x = *b;

    // Forward: L y = P b. `first` skips leading zeros of b.
    let mut first = None;
    for i in 0..N {
        let p = pivots[i];
        let mut sum = x[p];
        x[p] = x[i];
        if let Some(start) = first {
            for j in start..i {
                sum -= lu[i][j] * x[j];
            }
        } else if sum != 0.0 {
            first = Some(i);
        }
        x[i] = sum;
    }

    // Backward: U x = y.
    for i in (0..N).rev() {
        let mut sum = x[i];
        for j in (i + 1)..N {
            sum -= lu[i][j] * x[j];
        }
        x[i] = sum / lu[i][i];
    }
    x
}

/// Solve `A x = b`.
///
/// # Errors
///
/// Returns [`IatError::SingularSystem`] if `a` cannot be decomposed.
pub fn solve<const N: usize>(a: &[[f64; N]; N], b: &[f64; N]) -> Result<[f64; N], IatError> {
    Ok(LuDecomposition::decompose(a)?.back_substitute(b))
}
