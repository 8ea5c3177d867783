//! Projection operators of the constraint engine.
//!
//! Per-species projections act on one column of C (or one row of St) and are
//! applied to the selected lanes in parallel. Closure works on its species
//! jointly and normalization rescales C and St together so that `C·St` is
//! unchanged.

use ndarray::{Array2, ArrayView1, ArrayViewMut1, Axis};
use num_traits::Float;
use rayon::prelude::*;

use crate::lstsq::{LeastSquares, SolveError};
use crate::utils::{Direction, Normalize};

use super::config::{NormMethod, UnimodMode};

/// Runs `f` on every column of `m` whose index is in the sorted `species`.
pub fn for_each_column<F>(m: &mut Array2<f64>, species: &[usize], f: F)
where
    F: Fn(ArrayViewMut1<f64>) + Send + Sync,
{
    for_each_lane(m, Axis(1), species, f)
}

/// Runs `f` on every row of `m` whose index is in the sorted `species`.
pub fn for_each_row<F>(m: &mut Array2<f64>, species: &[usize], f: F)
where
    F: Fn(ArrayViewMut1<f64>) + Send + Sync,
{
    for_each_lane(m, Axis(0), species, f)
}

fn for_each_lane<F>(m: &mut Array2<f64>, axis: Axis, species: &[usize], f: F)
where
    F: Fn(ArrayViewMut1<f64>) + Send + Sync,
{
    if species.is_empty() {
        return;
    }
    m.axis_iter_mut(axis)
        .into_par_iter()
        .enumerate()
        .filter(|(i, _)| species.binary_search(i).is_ok())
        .for_each(|(_, lane)| f(lane));
}

/// Clips negative entries to zero.
pub fn nonneg<T: Float>(mut profile: ArrayViewMut1<T>) {
    profile.mapv_inplace(|v| if v < T::zero() { T::zero() } else { v });
}

fn argmax<T: Float>(profile: &ArrayViewMut1<T>) -> usize {
    let mut best = 0;
    for (i, &v) in profile.iter().enumerate() {
        if v > profile[best] {
            best = i;
        }
    }
    best
}

/// Forces a single-peaked profile.
///
/// Starting at the global maximum, the profile is walked outwards on each
/// side. A point exceeding `tol` times the last accepted value is corrected:
/// copied from its accepted neighbour (`Strict`) or averaged with it
/// (`Smooth`, after which the walk steps back two points to re-check).
pub fn unimodal<T: Float>(mut profile: ArrayViewMut1<T>, tol: T, mode: UnimodMode) {
    let n = profile.len();
    if n < 2 {
        return;
    }
    let peak = argmax(&profile);
    let two = T::one() + T::one();
    // bound on smooth corrections per side, strict afterwards
    let budget = n * n;

    let mut smooth_steps = 0;
    let mut current_max = profile[peak];
    let mut i = peak;
    while i > 0 {
        i -= 1;
        if profile[i] > current_max * tol {
            if mode == UnimodMode::Smooth && smooth_steps < budget {
                smooth_steps += 1;
                let avg = (profile[i] + profile[i + 1]) / two;
                profile[i] = avg;
                profile[i + 1] = avg;
                i = (i + 2).min(peak);
            } else {
                profile[i] = profile[i + 1];
            }
        }
        current_max = profile[i];
    }

    let mut smooth_steps = 0;
    let mut current_max = profile[peak];
    let mut i = peak;
    while i < n - 1 {
        i += 1;
        if profile[i] > current_max * tol {
            if mode == UnimodMode::Smooth && smooth_steps < budget {
                smooth_steps += 1;
                let avg = (profile[i] + profile[i - 1]) / two;
                profile[i] = avg;
                profile[i - 1] = avg;
                i = i.saturating_sub(2).max(peak);
            } else {
                profile[i] = profile[i - 1];
            }
        }
        current_max = profile[i];
    }
}

/// Forward scan: a point falling below `previous / tol` is raised to `previous`.
pub fn monotonic_increase<T: Float>(mut profile: ArrayViewMut1<T>, tol: T) {
    for i in 1..profile.len() {
        if profile[i] < profile[i - 1] / tol {
            profile[i] = profile[i - 1];
        }
    }
}

/// Forward scan: a point rising above `previous · tol` is lowered to `previous`.
pub fn monotonic_decrease<T: Float>(mut profile: ArrayViewMut1<T>, tol: T) {
    for i in 1..profile.len() {
        if profile[i] > profile[i - 1] * tol {
            profile[i] = profile[i - 1];
        }
    }
}

/// Rescales each row of the `species` columns so that they sum to
/// `target[row]`. Rows summing to zero are left as they are; their count is
/// returned.
pub fn closure_constant_sum(
    c: &mut Array2<f64>,
    species: &[usize],
    target: ArrayView1<f64>,
) -> anyhow::Result<usize> {
    let mut block = c.select(Axis(1), species);
    let sums = block.sum_axis(Axis(1)).to_vec();
    let skipped = block.normalize(&sums, &target.to_vec(), &Direction::ROW)?;
    for (k, &s) in species.iter().enumerate() {
        c.column_mut(s).assign(&block.column(k));
    }
    Ok(skipped)
}

/// Finds the per-species scale vector `q` minimizing
/// `||C[:, species]·diag(q) − target||` and applies it.
pub fn closure_scaling<L: LeastSquares + ?Sized>(
    c: &mut Array2<f64>,
    species: &[usize],
    target: ArrayView1<f64>,
    solver: &L,
) -> Result<(), SolveError> {
    let block = c.select(Axis(1), species);
    let rhs = target.insert_axis(Axis(1));
    let q = solver.solve(block.view(), rhs)?;
    for (k, &s) in species.iter().enumerate() {
        let scale = q[[k, 0]];
        c.column_mut(s).mapv_inplace(|v| v * scale);
    }
    Ok(())
}

/// Per-row scale factor of `st` for `method`.
pub fn spectral_scale(st: &Array2<f64>, method: NormMethod) -> Vec<f64> {
    st.rows()
        .into_iter()
        .map(|row| match method {
            NormMethod::Max => row.fold(f64::NEG_INFINITY, |a, &b| a.max(b)),
            NormMethod::Euclid => row.dot(&row).sqrt(),
        })
        .collect()
}

/// Divides each spectrum by its scale factor and multiplies the matching
/// concentration column by the same factor. Species with a zero or
/// non-finite factor are left untouched; their count is returned.
pub fn normalize_spectra(
    c: &mut Array2<f64>,
    st: &mut Array2<f64>,
    method: NormMethod,
) -> anyhow::Result<usize> {
    let alpha = spectral_scale(st, method);
    let ones = vec![1.0; alpha.len()];
    let skipped = st.normalize(&alpha, &ones, &Direction::ROW)?;

    let compensation: Vec<f64> = alpha
        .iter()
        .map(|&a| if a.is_finite() && a != 0.0 { a } else { 1.0 })
        .collect();
    c.normalize(&ones, &compensation, &Direction::COLUMN)?;
    Ok(skipped)
}
