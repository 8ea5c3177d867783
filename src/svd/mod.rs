//! # Rank-K reconstruction
//!
//! Truncated SVD back-ends and the PCA-style reconstruction used as the
//! frozen `Error/PCA` baseline of an MCR-ALS run.

use ndarray::{s, Array1, Array2, ArrayView2, Axis};

mod dense;
pub use dense::SVD;

/// Trait for SVD implementations.
///
/// Implementations return `(u, s, vt)` with singular values sorted in
/// descending order.
pub trait SVDImplementation: Send + Sync {
    fn compute(
        &self,
        matrix: ArrayView2<f64>,
    ) -> anyhow::Result<(Array2<f64>, Array1<f64>, Array2<f64>)>;
}

/// Dense SVD computed by nalgebra.
#[derive(Debug, Clone, Copy, Default)]
pub struct NalgebraSVD;

impl SVDImplementation for NalgebraSVD {
    fn compute(
        &self,
        matrix: ArrayView2<f64>,
    ) -> anyhow::Result<(Array2<f64>, Array1<f64>, Array2<f64>)> {
        let svd = SVD::new(&matrix)?;
        Ok(svd.into_parts())
    }
}

/// Best rank-K approximation of a data matrix.
pub trait RankReconstruction: Send + Sync {
    fn reconstruct(&self, x: ArrayView2<f64>, rank: usize) -> anyhow::Result<Array2<f64>>;
}

/// Rank-K reconstruction from the leading principal components.
///
/// With `center` enabled the column means are removed before the
/// decomposition and added back afterwards.
pub struct PcaReconstructor<S: SVDImplementation = NalgebraSVD> {
    center: bool,
    svd_implementation: S,
}

impl PcaReconstructor<NalgebraSVD> {
    pub fn new() -> Self {
        Self::with_svd(NalgebraSVD)
    }
}

impl Default for PcaReconstructor<NalgebraSVD> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SVDImplementation> PcaReconstructor<S> {
    pub fn with_svd(svd_implementation: S) -> Self {
        PcaReconstructor {
            center: true,
            svd_implementation,
        }
    }

    pub fn center(mut self, center: bool) -> Self {
        self.center = center;
        self
    }
}

impl<S: SVDImplementation> RankReconstruction for PcaReconstructor<S> {
    fn reconstruct(&self, x: ArrayView2<f64>, rank: usize) -> anyhow::Result<Array2<f64>> {
        let (n_samples, n_features) = x.dim();
        if n_samples == 0 || n_features == 0 {
            return Ok(Array2::zeros((n_samples, n_features)));
        }

        let mean = if self.center {
            x.mean_axis(Axis(0))
        } else {
            None
        };

        let mut centered = x.to_owned();
        if let Some(m) = &mean {
            centered -= m;
        }

        let (u, s, vt) = self.svd_implementation.compute(centered.view())?;
        let k = rank.min(s.len());

        let scores = &u.slice(s![.., ..k]) * &s.slice(s![..k]);
        let mut reconstructed = scores.dot(&vt.slice(s![..k, ..]));

        if let Some(m) = &mean {
            reconstructed += m;
        }
        Ok(reconstructed)
    }
}
