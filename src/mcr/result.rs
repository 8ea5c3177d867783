//! Outcome of an MCR-ALS optimization.

use ndarray::Array2;

use super::config::McrConfig;
use super::convergence::TerminalState;
use super::external::ExternalOutput;
use super::history::IterationLog;
use super::init::GuessKind;

/// Data, reconstruction and residual, ready to be drawn as a merit plot.
#[derive(Debug, Clone)]
pub struct Merit {
    pub x: Array2<f64>,
    pub x_hat: Array2<f64>,
    /// `x − x_hat`
    pub residual: Array2<f64>,
}

/// Final state of an optimization. Immutable once returned.
///
/// `S` is the state type of the external concentration provider, `()` for
/// runs without one.
#[derive(Debug, Clone)]
pub struct McrResult<S = ()> {
    pub(crate) x: Array2<f64>,
    pub(crate) x_pca: Array2<f64>,
    pub(crate) c: Array2<f64>,
    pub(crate) st: Array2<f64>,
    pub(crate) c_hard: Array2<f64>,
    pub(crate) st_soft: Array2<f64>,
    pub(crate) external: Option<ExternalOutput<S>>,
    pub(crate) history: IterationLog,
    pub(crate) config: McrConfig,
    pub(crate) guess_kind: GuessKind,
    pub(crate) terminal: TerminalState,
}

impl<S> McrResult<S> {
    /// Concentration profiles (`M × K`).
    pub fn c(&self) -> &Array2<f64> {
        &self.c
    }

    /// Pure spectra (`K × N`).
    pub fn st(&self) -> &Array2<f64> {
        &self.st
    }

    /// Concentrations right after the concentration constraints of the last
    /// iteration, before the consistency refit.
    pub fn c_hard(&self) -> &Array2<f64> {
        &self.c_hard
    }

    /// Spectra of the last iteration before spectral non-negativity and
    /// normalization.
    pub fn st_soft(&self) -> &Array2<f64> {
        &self.st_soft
    }

    /// Last profiles and state returned by the external provider.
    pub fn external(&self) -> Option<&ExternalOutput<S>> {
        self.external.as_ref()
    }

    pub fn history(&self) -> &IterationLog {
        &self.history
    }

    /// Rendered text form of the iteration log.
    pub fn log(&self) -> String {
        self.history.render()
    }

    pub fn config(&self) -> &McrConfig {
        &self.config
    }

    pub fn guess_kind(&self) -> GuessKind {
        self.guess_kind
    }

    pub fn terminal_state(&self) -> TerminalState {
        self.terminal
    }

    pub fn converged(&self) -> bool {
        self.terminal == TerminalState::Converged
    }

    pub fn iterations(&self) -> usize {
        self.history.records().len()
    }

    pub fn n_species(&self) -> usize {
        self.c.ncols()
    }

    /// The data matrix the optimization ran on.
    pub fn x(&self) -> &Array2<f64> {
        &self.x
    }

    /// Frozen rank-K reference reconstruction behind `Error/PCA`.
    pub fn pca_reference(&self) -> &Array2<f64> {
        &self.x_pca
    }

    /// `C·St`
    pub fn reconstruct(&self) -> Array2<f64> {
        self.c.dot(&self.st)
    }

    /// Owned copies of `(C, St)`.
    pub fn transform(&self) -> (Array2<f64>, Array2<f64>) {
        (self.c.clone(), self.st.clone())
    }

    pub fn merit(&self) -> Merit {
        let x_hat = self.reconstruct();
        let residual = &self.x - &x_hat;
        Merit {
            x: self.x.clone(),
            x_hat,
            residual,
        }
    }
}
