//! Shape checks and the first cross-fit of an MCR-ALS run.

use ndarray::{Array2, ArrayView2};

use crate::lstsq::LeastSquares;
use crate::svd::RankReconstruction;
use crate::utils::all_finite;

use super::error::{McrError, Result};

/// Which profile the caller's guess describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessKind {
    /// `M × K`: concentration profiles.
    Concentration,
    /// `K × N`: pure spectra.
    Spectra,
}

/// Classifies a guess against data of shape `(M, N)` and returns the number
/// of species K.
pub fn classify(data: (usize, usize), guess: (usize, usize)) -> Result<(GuessKind, usize)> {
    let mismatch = |reason| McrError::ShapeMismatch {
        data,
        guess,
        reason,
    };
    let (m, n) = data;
    if m == 0 || n == 0 {
        return Err(mismatch("data matrix is empty"));
    }

    let conc_like = guess.0 == m;
    let spec_like = guess.1 == n;
    match (conc_like, spec_like) {
        (true, true) => Err(mismatch(
            "guess matches both dimensions, cannot tell concentrations from spectra",
        )),
        (false, false) => Err(mismatch("guess matches neither dimension of the data")),
        (true, false) if guess.1 == 0 => Err(mismatch("guess has no species")),
        (false, true) if guess.0 == 0 => Err(mismatch("guess has no species")),
        (true, false) => Ok((GuessKind::Concentration, guess.1)),
        (false, true) => Ok((GuessKind::Spectra, guess.0)),
    }
}

/// Working state right after initialization.
pub(crate) struct Initialized {
    pub kind: GuessKind,
    pub n_species: usize,
    pub c: Array2<f64>,
    pub st: Array2<f64>,
    /// Rank-K reference reconstruction, frozen for the whole run.
    pub x_pca: Array2<f64>,
}

/// `C = argmin ||St^T·C^T − X^T||`, transposed back to `M × K`.
pub(crate) fn fit_concentrations<L: LeastSquares + ?Sized>(
    solver: &L,
    x: ArrayView2<f64>,
    st: ArrayView2<f64>,
    stage: &'static str,
) -> Result<Array2<f64>> {
    let ct = solver
        .solve(st.t(), x.t())
        .map_err(McrError::solve(stage))?;
    Ok(ct.reversed_axes())
}

/// `St = argmin ||C·St − X||`.
pub(crate) fn fit_spectra<L: LeastSquares + ?Sized>(
    solver: &L,
    x: ArrayView2<f64>,
    c: ArrayView2<f64>,
    stage: &'static str,
) -> Result<Array2<f64>> {
    solver.solve(c, x).map_err(McrError::solve(stage))
}

pub(crate) fn initialize<L, R>(
    x: ArrayView2<f64>,
    guess: ArrayView2<f64>,
    solver: &L,
    reconstructor: &R,
) -> Result<Initialized>
where
    L: LeastSquares + ?Sized,
    R: RankReconstruction + ?Sized,
{
    let (kind, n_species) = classify(x.dim(), guess.dim())?;
    if !all_finite(x) {
        return Err(McrError::NonFinite("data matrix"));
    }
    if !all_finite(guess) {
        return Err(McrError::NonFinite("initial guess"));
    }

    let (c, st) = match kind {
        GuessKind::Concentration => {
            let c = guess.to_owned();
            let st = fit_spectra(solver, x, c.view(), "fitting the initial spectra")?;
            (c, st)
        }
        GuessKind::Spectra => {
            let st = guess.to_owned();
            let c = fit_concentrations(solver, x, st.view(), "fitting the initial concentrations")?;
            (c, st)
        }
    };

    let x_pca = reconstructor
        .reconstruct(x, n_species)
        .map_err(|source| McrError::Reconstruction {
            rank: n_species,
            source,
        })?;

    log::debug!(
        "initialized from {:?} guess: {} species, data {}x{}",
        kind,
        n_species,
        x.nrows(),
        x.ncols()
    );

    Ok(Initialized {
        kind,
        n_species,
        c,
        st,
        x_pca,
    })
}
