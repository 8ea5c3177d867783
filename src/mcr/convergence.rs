//! Convergence / divergence bookkeeping of the ALS loop.

use std::fmt;

/// Residuals at or below `NOISE_FLOOR · baseline` are rounding noise of an
/// exact reconstruction; their relative change carries no information.
pub const NOISE_FLOOR: f64 = 1e3 * f64::EPSILON;

/// Terminal states of an optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    /// The residual changed by less than `tol` percent.
    Converged,
    /// `maxdiv` successive iterations did not improve the residual.
    DivergenceStopped,
    /// `maxit` iterations were performed.
    MaxIterReached,
    /// The caller's cancellation flag was raised.
    Cancelled,
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminalState::Converged => "converged",
            TerminalState::DivergenceStopped => "divergence stop",
            TerminalState::MaxIterReached => "maximum iterations reached",
            TerminalState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Outcome of recording one iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    /// Signed percent change of the residual; positive means it worsened.
    pub change: f64,
    pub divergence_count: usize,
}

/// Tracks the residual, its percent change, the divergence counter and the
/// iteration count, and decides when the loop stops.
#[derive(Debug, Clone)]
pub struct ConvergenceController {
    tol: f64,
    maxit: usize,
    maxdiv: usize,
    residual: f64,
    floor: f64,
    // magnitude compared against `tol`; positive changes are kept as is
    change: f64,
    iterations: usize,
    divergence_count: usize,
}

impl ConvergenceController {
    /// `initial_residual` is the baseline the first iteration is compared
    /// to (the standard deviation of the data). It also scales the noise
    /// floor below which two successive residuals count as unchanged.
    pub fn new(tol: f64, maxit: usize, maxdiv: usize, initial_residual: f64) -> Self {
        ConvergenceController {
            tol,
            maxit,
            maxdiv,
            residual: initial_residual,
            floor: initial_residual.abs() * NOISE_FLOOR,
            change: tol + 1.0,
            iterations: 0,
            divergence_count: 0,
        }
    }

    /// `None` while running. Conditions are checked in the order tolerance,
    /// divergence, iteration count.
    pub fn status(&self) -> Option<TerminalState> {
        if self.change < self.tol {
            Some(TerminalState::Converged)
        } else if self.divergence_count >= self.maxdiv {
            Some(TerminalState::DivergenceStopped)
        } else if self.iterations >= self.maxit {
            Some(TerminalState::MaxIterReached)
        } else {
            None
        }
    }

    /// Records the residual of a finished iteration.
    pub fn record(&mut self, residual: f64) -> Step {
        self.iterations += 1;

        let change = if self.residual <= self.floor && residual <= self.floor {
            0.0
        } else if self.residual == 0.0 {
            f64::INFINITY
        } else {
            100.0 * (residual - self.residual) / self.residual
        };
        self.residual = residual;

        if change > 0.0 {
            self.divergence_count += 1;
            self.change = change;
        } else {
            self.divergence_count = 0;
            self.change = -change;
        }

        Step {
            change,
            divergence_count: self.divergence_count,
        }
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn divergence_count(&self) -> usize {
        self.divergence_count
    }

    pub fn residual(&self) -> f64 {
        self.residual
    }
}
