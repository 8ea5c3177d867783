//! MCR-ALS errors.

use thiserror::Error;

use crate::lstsq::SolveError;

/// Result alias for MCR-ALS operations.
pub type Result<T> = std::result::Result<T, McrError>;

/// Errors that abort an MCR-ALS run. Non-convergence is not an error.
#[derive(Error, Debug)]
pub enum McrError {
    /// The guess matches neither (or both) dimensions of the data.
    #[error("guess of shape {guess:?} does not fit data of shape {data:?}: {reason}")]
    ShapeMismatch {
        data: (usize, usize),
        guess: (usize, usize),
        reason: &'static str,
    },

    /// A numeric option is out of its domain.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A species index in a constraint set is not below K.
    #[error("species index {index} in `{option}` is out of range for {n_species} species")]
    SpeciesOutOfRange {
        option: &'static str,
        index: usize,
        n_species: usize,
    },

    #[error("`externalConc` is configured but no external concentration provider was supplied")]
    MissingExternalProvider,

    /// Least-squares back-end failure; never retried.
    #[error("least-squares solve failed while {stage}: {source}")]
    Solve {
        stage: &'static str,
        #[source]
        source: SolveError,
    },

    #[error("rank-{rank} reference reconstruction failed: {source}")]
    Reconstruction {
        rank: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("external concentration provider failed: {0}")]
    External(#[source] anyhow::Error),

    #[error("external provider returned profiles of shape {got:?}, expected {expected:?}")]
    ExternalShape {
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("{0} produced non-finite values")]
    NonFinite(&'static str),

    /// A constraint projection rejected its inputs.
    #[error("{stage} failed: {source}")]
    Projection {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl McrError {
    pub(crate) fn solve(stage: &'static str) -> impl FnOnce(SolveError) -> McrError {
        move |source| McrError::Solve { stage, source }
    }

    pub(crate) fn projection(stage: &'static str) -> impl FnOnce(anyhow::Error) -> McrError {
        move |source| McrError::Projection { stage, source }
    }
}
