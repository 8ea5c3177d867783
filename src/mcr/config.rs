//! Options of an MCR-ALS run.
//!
//! `McrConfig` carries every recognized option with its documented default.
//! It can be assembled with the chained setters or deserialized from an
//! option map using the conventional camelCase names (`tol`, `maxit`,
//! `nonnegConc`, `unimodTol`, ...); unknown keys are rejected.

use ndarray::Array1;
use serde::Deserialize;

use super::error::{McrError, Result};

/// Species a constraint applies to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "SelectionRepr")]
pub enum SpeciesSelection {
    All,
    None,
    Indices(Vec<usize>),
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum SelectionKeyword {
    All,
    None,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SelectionRepr {
    Indices(Vec<usize>),
    Keyword(SelectionKeyword),
    Null,
}

impl From<SelectionRepr> for SpeciesSelection {
    fn from(repr: SelectionRepr) -> Self {
        match repr {
            SelectionRepr::Indices(idx) => SpeciesSelection::Indices(idx),
            SelectionRepr::Keyword(SelectionKeyword::All) => SpeciesSelection::All,
            SelectionRepr::Keyword(SelectionKeyword::None) | SelectionRepr::Null => {
                SpeciesSelection::None
            }
        }
    }
}

impl From<Vec<usize>> for SpeciesSelection {
    fn from(idx: Vec<usize>) -> Self {
        SpeciesSelection::Indices(idx)
    }
}

impl<const N: usize> From<[usize; N]> for SpeciesSelection {
    fn from(idx: [usize; N]) -> Self {
        SpeciesSelection::Indices(idx.to_vec())
    }
}

impl From<&[usize]> for SpeciesSelection {
    fn from(idx: &[usize]) -> Self {
        SpeciesSelection::Indices(idx.to_vec())
    }
}

impl SpeciesSelection {
    /// Sorted, deduplicated indices, each checked against `n_species`.
    pub fn resolve(&self, option: &'static str, n_species: usize) -> Result<Vec<usize>> {
        let mut idx = match self {
            SpeciesSelection::All => (0..n_species).collect(),
            SpeciesSelection::None => Vec::new(),
            SpeciesSelection::Indices(idx) => idx.clone(),
        };
        if let Some(&index) = idx.iter().find(|&&i| i >= n_species) {
            return Err(McrError::SpeciesOutOfRange {
                option,
                index,
                n_species,
            });
        }
        idx.sort_unstable();
        idx.dedup();
        Ok(idx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnimodMode {
    /// Violating points are replaced by their accepted neighbour.
    #[default]
    Strict,
    /// Violating points are averaged with their accepted neighbour.
    Smooth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClosureMethod {
    /// One least-squares scale factor per species.
    #[default]
    Scaling,
    /// Per-sample rescaling so the selected species sum to the target.
    ConstantSum,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ClosureTarget {
    Constant(f64),
    PerSample(Vec<f64>),
}

impl Default for ClosureTarget {
    fn default() -> Self {
        ClosureTarget::Constant(1.0)
    }
}

impl ClosureTarget {
    fn resolve(&self, n_samples: usize) -> Result<Array1<f64>> {
        let target = match self {
            ClosureTarget::Constant(v) => Array1::from_elem(n_samples, *v),
            ClosureTarget::PerSample(v) => {
                if v.len() != n_samples {
                    return Err(McrError::InvalidConfig(format!(
                        "closureTarget has {} values but the data has {} samples",
                        v.len(),
                        n_samples
                    )));
                }
                Array1::from(v.clone())
            }
        };
        if target.iter().any(|t| !t.is_finite()) {
            return Err(McrError::InvalidConfig(
                "closureTarget must be finite".to_string(),
            ));
        }
        Ok(target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormMethod {
    /// Divide each spectrum by its maximum.
    Max,
    /// Divide each spectrum by its Euclidean norm.
    Euclid,
}

/// Configuration of an MCR-ALS optimization.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct McrConfig {
    /// Convergence threshold on the percent change of the residual (0.1).
    pub tol: f64,
    /// Maximum number of ALS iterations (50).
    pub maxit: usize,
    /// Maximum number of successive non-improving iterations (5).
    pub maxdiv: usize,

    pub nonneg_conc: SpeciesSelection,
    pub unimod_conc: SpeciesSelection,
    pub unimod_tol: f64,
    pub unimod_mod: UnimodMode,
    pub closure_conc: SpeciesSelection,
    pub closure_target: ClosureTarget,
    pub closure_method: ClosureMethod,
    pub mono_inc_conc: SpeciesSelection,
    pub mono_inc_tol: f64,
    pub mono_dec_conc: SpeciesSelection,
    pub mono_dec_tol: f64,
    /// Species whose profile is supplied by an external provider.
    pub external_conc: SpeciesSelection,
    /// Maps provider output column `j` onto a column of C (`None` skips it).
    /// Defaults to `externalConc` in order.
    pub external_to_conc_index: Option<Vec<Option<usize>>>,

    pub nonneg_spec: SpeciesSelection,
    pub norm_spec: Option<NormMethod>,

    /// Emit the iteration log at info level instead of debug.
    pub verbose: bool,
}

impl Default for McrConfig {
    fn default() -> Self {
        McrConfig {
            tol: 0.1,
            maxit: 50,
            maxdiv: 5,
            nonneg_conc: SpeciesSelection::All,
            unimod_conc: SpeciesSelection::All,
            unimod_tol: 1.1,
            unimod_mod: UnimodMode::Strict,
            closure_conc: SpeciesSelection::None,
            closure_target: ClosureTarget::default(),
            closure_method: ClosureMethod::Scaling,
            mono_inc_conc: SpeciesSelection::None,
            mono_inc_tol: 1.1,
            mono_dec_conc: SpeciesSelection::None,
            mono_dec_tol: 1.1,
            external_conc: SpeciesSelection::None,
            external_to_conc_index: None,
            nonneg_spec: SpeciesSelection::All,
            norm_spec: None,
            verbose: false,
        }
    }
}

impl McrConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn maxit(mut self, maxit: usize) -> Self {
        self.maxit = maxit;
        self
    }

    pub fn maxdiv(mut self, maxdiv: usize) -> Self {
        self.maxdiv = maxdiv;
        self
    }

    pub fn nonneg_conc(mut self, species: impl Into<SpeciesSelection>) -> Self {
        self.nonneg_conc = species.into();
        self
    }

    pub fn unimod_conc(mut self, species: impl Into<SpeciesSelection>) -> Self {
        self.unimod_conc = species.into();
        self
    }

    pub fn unimod_tol(mut self, tol: f64) -> Self {
        self.unimod_tol = tol;
        self
    }

    pub fn unimod_mod(mut self, mode: UnimodMode) -> Self {
        self.unimod_mod = mode;
        self
    }

    pub fn closure(
        mut self,
        species: impl Into<SpeciesSelection>,
        target: ClosureTarget,
        method: ClosureMethod,
    ) -> Self {
        self.closure_conc = species.into();
        self.closure_target = target;
        self.closure_method = method;
        self
    }

    pub fn mono_inc(mut self, species: impl Into<SpeciesSelection>, tol: f64) -> Self {
        self.mono_inc_conc = species.into();
        self.mono_inc_tol = tol;
        self
    }

    pub fn mono_dec(mut self, species: impl Into<SpeciesSelection>, tol: f64) -> Self {
        self.mono_dec_conc = species.into();
        self.mono_dec_tol = tol;
        self
    }

    pub fn external(
        mut self,
        species: impl Into<SpeciesSelection>,
        to_conc_index: Option<Vec<Option<usize>>>,
    ) -> Self {
        self.external_conc = species.into();
        self.external_to_conc_index = to_conc_index;
        self
    }

    pub fn nonneg_spec(mut self, species: impl Into<SpeciesSelection>) -> Self {
        self.nonneg_spec = species.into();
        self
    }

    pub fn norm_spec(mut self, method: Option<NormMethod>) -> Self {
        self.norm_spec = method;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Checks the options that do not depend on the data.
    pub fn validate(&self) -> Result<()> {
        if !self.tol.is_finite() || self.tol < 0.0 {
            return Err(McrError::InvalidConfig(format!(
                "tol must be finite and non-negative, got {}",
                self.tol
            )));
        }
        if self.maxit == 0 {
            return Err(McrError::InvalidConfig("maxit must be at least 1".to_string()));
        }
        if self.maxdiv == 0 {
            return Err(McrError::InvalidConfig("maxdiv must be at least 1".to_string()));
        }
        for (name, value) in [
            ("unimodTol", self.unimod_tol),
            ("monoIncTol", self.mono_inc_tol),
            ("monoDecTol", self.mono_dec_tol),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(McrError::InvalidConfig(format!(
                    "{} must be finite and positive, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Resolves species sets and targets for `n_species` species and
    /// `n_samples` samples.
    pub(crate) fn resolve(
        &self,
        n_species: usize,
        n_samples: usize,
        has_provider: bool,
    ) -> Result<Constraints> {
        self.validate()?;

        let mut warnings = Vec::new();

        let nonneg_conc = self.nonneg_conc.resolve("nonnegConc", n_species)?;
        let unimod_conc = self.unimod_conc.resolve("unimodConc", n_species)?;
        let mono_inc_conc = self.mono_inc_conc.resolve("monoIncConc", n_species)?;
        let mono_dec_conc = self.mono_dec_conc.resolve("monoDecConc", n_species)?;
        let closure_conc = self.closure_conc.resolve("closureConc", n_species)?;
        let external_conc = self.external_conc.resolve("externalConc", n_species)?;
        let nonneg_spec = self.nonneg_spec.resolve("nonnegSpec", n_species)?;

        if self.unimod_tol < 1.0 && !unimod_conc.is_empty() {
            warnings.push(format!(
                "unimodTol = {} is below 1: profiles are pulled under their neighbours",
                self.unimod_tol
            ));
        }
        for s in mono_inc_conc.iter().filter(|s| mono_dec_conc.contains(s)) {
            warnings.push(format!(
                "species {} is constrained to both increase and decrease monotonically",
                s
            ));
        }

        let closure = if closure_conc.is_empty() {
            if self.closure_conc != SpeciesSelection::None {
                warnings.push("closureConc selects no species: closure disabled".to_string());
            }
            None
        } else {
            Some(Closure {
                species: closure_conc,
                target: self.closure_target.resolve(n_samples)?,
                method: self.closure_method,
            })
        };

        let external = if external_conc.is_empty() {
            if has_provider {
                warnings.push(
                    "an external provider was supplied but externalConc is empty: provider ignored"
                        .to_string(),
                );
            }
            None
        } else {
            if !has_provider {
                return Err(McrError::MissingExternalProvider);
            }
            let mapping = self.resolve_external_mapping(&external_conc, n_species)?;
            Some(ExternalMapping {
                targets: external_conc,
                to_conc: mapping,
            })
        };

        Ok(Constraints {
            nonneg_conc,
            unimod_conc,
            unimod_tol: self.unimod_tol,
            unimod_mod: self.unimod_mod,
            mono_inc_conc,
            mono_inc_tol: self.mono_inc_tol,
            mono_dec_conc,
            mono_dec_tol: self.mono_dec_tol,
            closure,
            external,
            nonneg_spec,
            norm_spec: self.norm_spec,
            warnings,
        })
    }

    fn resolve_external_mapping(
        &self,
        targets: &[usize],
        n_species: usize,
    ) -> Result<Vec<Option<usize>>> {
        let mapping = match &self.external_to_conc_index {
            Some(m) => m.clone(),
            None => targets.iter().map(|&t| Some(t)).collect(),
        };

        let mut covered = vec![0usize; n_species];
        for &col in mapping.iter().flatten() {
            if col >= n_species {
                return Err(McrError::SpeciesOutOfRange {
                    option: "externalToConcIndex",
                    index: col,
                    n_species,
                });
            }
            if targets.binary_search(&col).is_err() {
                return Err(McrError::InvalidConfig(format!(
                    "externalToConcIndex maps onto species {} which is not in externalConc",
                    col
                )));
            }
            covered[col] += 1;
        }
        if let Some(&t) = targets.iter().find(|&&t| covered[t] != 1) {
            return Err(McrError::InvalidConfig(format!(
                "externalToConcIndex must map exactly one external profile onto species {}",
                t
            )));
        }
        Ok(mapping)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Closure {
    pub species: Vec<usize>,
    pub target: Array1<f64>,
    pub method: ClosureMethod,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExternalMapping {
    pub targets: Vec<usize>,
    pub to_conc: Vec<Option<usize>>,
}

/// Constraint sets validated against K and M.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Constraints {
    pub nonneg_conc: Vec<usize>,
    pub unimod_conc: Vec<usize>,
    pub unimod_tol: f64,
    pub unimod_mod: UnimodMode,
    pub mono_inc_conc: Vec<usize>,
    pub mono_inc_tol: f64,
    pub mono_dec_conc: Vec<usize>,
    pub mono_dec_tol: f64,
    pub closure: Option<Closure>,
    pub external: Option<ExternalMapping>,
    pub nonneg_spec: Vec<usize>,
    pub norm_spec: Option<NormMethod>,
    pub warnings: Vec<String>,
}
