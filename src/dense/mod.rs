use anyhow::bail;
use nalgebra::DMatrix;
use ndarray::{Array2, ArrayView2};
use nshare::{IntoNalgebra, IntoNdarray2};
use num_traits::Float;

use crate::utils::{Direction, Normalize};

/// Copies an ndarray view into an owned nalgebra matrix.
pub(crate) fn to_nalgebra(x: ArrayView2<f64>) -> DMatrix<f64> {
    x.as_standard_layout().into_owned().into_nalgebra()
}

/// Moves an nalgebra matrix back into an ndarray array.
pub(crate) fn to_ndarray(m: DMatrix<f64>) -> Array2<f64> {
    m.into_ndarray2().into_owned()
}

fn usable<T: Float>(sum: T) -> bool {
    sum.is_finite() && sum != T::zero()
}

impl<T: Float> Normalize<T> for Array2<T> {
    fn normalize(
        &mut self,
        sums: &[T],
        targets: &[T],
        direction: &Direction,
    ) -> anyhow::Result<usize> {
        let lanes = match direction {
            Direction::ROW => self.nrows(),
            Direction::COLUMN => self.ncols(),
        };
        if sums.len() != lanes {
            bail!(
                "Length of sums ({}) does not match number of {} ({})",
                sums.len(),
                if *direction == Direction::ROW { "rows" } else { "columns" },
                lanes
            );
        }
        if targets.len() != lanes {
            bail!(
                "Length of targets ({}) does not match number of lanes ({})",
                targets.len(),
                lanes
            );
        }

        let mut skipped = 0;
        let iter = match direction {
            Direction::ROW => self.rows_mut().into_iter(),
            Direction::COLUMN => self.columns_mut().into_iter(),
        };
        for (i, mut lane) in iter.enumerate() {
            if !usable(sums[i]) {
                skipped += 1;
                continue;
            }
            let scale = targets[i] / sums[i];
            lane.mapv_inplace(|v| v * scale);
        }
        Ok(skipped)
    }
}
