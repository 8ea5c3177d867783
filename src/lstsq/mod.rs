//! # Least squares
//!
//! Dense solvers for `argmin_X ||A·X − B||`, the refit primitive of every
//! ALS half-step.

use ndarray::{Array2, ArrayView2};
use thiserror::Error;

use crate::dense::{to_nalgebra, to_ndarray};
use crate::utils::all_finite;

/// Failures reported by a least-squares back-end.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    #[error("left-hand side has {a_rows} rows but right-hand side has {b_rows}")]
    DimensionMismatch { a_rows: usize, b_rows: usize },

    /// Every singular value of `A` is below the cutoff (or `A` is empty).
    #[error("degenerate {rows}x{cols} system: rank 0")]
    Singular { rows: usize, cols: usize },

    #[error("non-finite values in {0}")]
    NonFinite(&'static str),

    #[error("solver failure: {0}")]
    Backend(String),
}

/// Trait for least-squares back-ends.
pub trait LeastSquares: Send + Sync {
    /// Returns `X` minimizing `||a·X − b||`; `a` is `m×k`, `b` is `m×n`.
    fn solve(&self, a: ArrayView2<f64>, b: ArrayView2<f64>) -> Result<Array2<f64>, SolveError>;
}

/// Minimum-norm least squares through the SVD pseudo-inverse.
///
/// Singular values below `max(m, k) · σ_max · rcond` count as zero, which
/// with the default `rcond = f64::EPSILON` matches LAPACK `gelsd` with
/// `rcond=None`.
#[derive(Debug, Clone, Copy)]
pub struct SvdLeastSquares {
    rcond: f64,
}

impl SvdLeastSquares {
    pub fn new() -> Self {
        SvdLeastSquares {
            rcond: f64::EPSILON,
        }
    }

    pub fn rcond(mut self, rcond: f64) -> Self {
        self.rcond = rcond;
        self
    }
}

impl Default for SvdLeastSquares {
    fn default() -> Self {
        Self::new()
    }
}

impl LeastSquares for SvdLeastSquares {
    fn solve(&self, a: ArrayView2<f64>, b: ArrayView2<f64>) -> Result<Array2<f64>, SolveError> {
        let (rows, cols) = a.dim();
        if b.nrows() != rows {
            return Err(SolveError::DimensionMismatch {
                a_rows: rows,
                b_rows: b.nrows(),
            });
        }
        if rows == 0 || cols == 0 {
            return Err(SolveError::Singular { rows, cols });
        }
        if !all_finite(a) {
            return Err(SolveError::NonFinite("coefficient matrix"));
        }
        if !all_finite(b) {
            return Err(SolveError::NonFinite("right-hand side"));
        }

        let svd = nalgebra::linalg::SVD::new(to_nalgebra(a), true, true);
        let sigma_max = svd.singular_values.iter().cloned().fold(0.0f64, f64::max);
        let eps = rows.max(cols) as f64 * sigma_max * self.rcond;

        let rank = svd.singular_values.iter().filter(|&&s| s > eps).count();
        if rank == 0 {
            return Err(SolveError::Singular { rows, cols });
        }
        if rank < cols {
            log::debug!("rank-deficient least squares: rank {} of {}", rank, cols);
        }

        let x = svd
            .solve(&to_nalgebra(b), eps)
            .map_err(|e| SolveError::Backend(e.to_string()))?;
        let x = to_ndarray(x);

        if !all_finite(x.view()) {
            return Err(SolveError::NonFinite("solution"));
        }
        Ok(x)
    }
}
