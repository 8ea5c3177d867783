use ndarray::ArrayView2;
use num_traits::{Float, FromPrimitive};

/// Axis along which a per-lane operation is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ROW,
    COLUMN,
}

/// Rescales every row (or column) `i` of a matrix by `targets[i] / sums[i]`.
///
/// Lanes whose `sums[i]` is zero or non-finite are left untouched, so the
/// result never picks up infinities. Returns the number of skipped lanes.
pub trait Normalize<T: Float> {
    fn normalize(
        &mut self,
        sums: &[T],
        targets: &[T],
        direction: &Direction,
    ) -> anyhow::Result<usize>;
}

/// Population standard deviation (`ddof = 0`) over every element.
pub fn std_dev<T>(x: ArrayView2<T>) -> T
where
    T: Float + FromPrimitive,
{
    if x.is_empty() {
        return T::zero();
    }
    x.std(T::zero())
}

/// Returns `true` when every element is finite.
pub fn all_finite<T: Float>(x: ArrayView2<T>) -> bool {
    x.iter().all(|v| v.is_finite())
}
