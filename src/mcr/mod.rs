//! # Multivariate Curve Resolution by Alternating Least Squares
//!
//! Resolves a data matrix `X` (`M` samples × `N` features, e.g. elution time ×
//! wavelength) into concentration profiles `C` (`M × K`) and pure spectra
//! `St` (`K × N`) such that `X ≈ C·St`, starting from a guess of either
//! factor.
//!
//! Each iteration refits `C` from `St`, projects it through the concentration
//! constraints (non-negativity, unimodality, monotonicity, closure, external
//! profiles), refits `St` from the constrained `C`, refits `C` once more from
//! that `St`, and finally applies spectral non-negativity and normalization.
//! The loop stops on convergence of the residual, after `maxdiv` successive
//! non-improving iterations, or after `maxit` iterations.
//!
//! ```no_run
//! use ndarray::Array2;
//! use single_mcr::mcr::{McrAlsBuilder, McrConfig, NormMethod};
//!
//! # fn main() -> single_mcr::mcr::Result<()> {
//! let x = Array2::<f64>::ones((50, 30));
//! let guess = Array2::<f64>::ones((50, 2));
//! let mcr = McrAlsBuilder::new()
//!     .config(McrConfig::new().norm_spec(Some(NormMethod::Euclid)))
//!     .build()?;
//! let result = mcr.fit(x.view(), guess.view())?;
//! println!("{}", result.log());
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::{Array2, ArrayView2};

use crate::lstsq::{LeastSquares, SvdLeastSquares};
use crate::svd::{PcaReconstructor, RankReconstruction};
use crate::utils::{all_finite, std_dev};

pub mod config;
pub mod constraints;
pub mod convergence;
mod error;
pub mod external;
mod history;
pub mod init;
mod result;

pub use config::{
    ClosureMethod, ClosureTarget, McrConfig, NormMethod, SpeciesSelection, UnimodMode,
};
pub use convergence::{ConvergenceController, TerminalState};
pub use error::{McrError, Result};
pub use external::{ConcentrationProvider, External, ExternalOutput, FnProvider, NoProvider};
pub use history::{IterationLog, IterationRecord};
pub use init::GuessKind;
pub use result::{McrResult, Merit};

use config::Constraints;
use constraints::{
    closure_constant_sum, closure_scaling, for_each_column, for_each_row, monotonic_decrease,
    monotonic_increase, nonneg, normalize_spectra, unimodal,
};
use init::{fit_concentrations, fit_spectra, initialize};

pub struct McrAlsBuilder<L: LeastSquares = SvdLeastSquares, R: RankReconstruction = PcaReconstructor>
{
    config: McrConfig,
    solver: L,
    reconstructor: R,
    cancel: Option<Arc<AtomicBool>>,
}

impl McrAlsBuilder {
    pub fn new() -> Self {
        McrAlsBuilder {
            config: McrConfig::default(),
            solver: SvdLeastSquares::new(),
            reconstructor: PcaReconstructor::new(),
            cancel: None,
        }
    }
}

impl Default for McrAlsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: LeastSquares, R: RankReconstruction> McrAlsBuilder<L, R> {
    pub fn config(mut self, config: McrConfig) -> Self {
        self.config = config;
        self
    }

    pub fn solver<L2: LeastSquares>(self, solver: L2) -> McrAlsBuilder<L2, R> {
        McrAlsBuilder {
            config: self.config,
            solver,
            reconstructor: self.reconstructor,
            cancel: self.cancel,
        }
    }

    pub fn reconstructor<R2: RankReconstruction>(self, reconstructor: R2) -> McrAlsBuilder<L, R2> {
        McrAlsBuilder {
            config: self.config,
            solver: self.solver,
            reconstructor,
            cancel: self.cancel,
        }
    }

    /// Flag checked before every iteration; once set the run stops with
    /// [`TerminalState::Cancelled`].
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn build(self) -> Result<McrAls<L, R>> {
        self.config.validate()?;
        Ok(McrAls {
            config: self.config,
            solver: self.solver,
            reconstructor: self.reconstructor,
            cancel: self.cancel,
        })
    }
}

/// A configured MCR-ALS optimizer. Each call to [`McrAls::fit`] is an
/// independent run owning its own working matrices.
pub struct McrAls<L: LeastSquares = SvdLeastSquares, R: RankReconstruction = PcaReconstructor> {
    config: McrConfig,
    solver: L,
    reconstructor: R,
    cancel: Option<Arc<AtomicBool>>,
}

impl<L: LeastSquares, R: RankReconstruction> McrAls<L, R> {
    pub fn config(&self) -> &McrConfig {
        &self.config
    }

    /// Runs the optimization from a concentration (`M × K`) or spectra
    /// (`K × N`) guess.
    pub fn fit(&self, x: ArrayView2<f64>, guess: ArrayView2<f64>) -> Result<McrResult> {
        self.run::<NoProvider>(x, guess, None)
    }

    /// Same as [`McrAls::fit`], with the `externalConc` species supplied by
    /// `external` at every iteration.
    pub fn fit_with_external<P: ConcentrationProvider>(
        &self,
        x: ArrayView2<f64>,
        guess: ArrayView2<f64>,
        external: External<P>,
    ) -> Result<McrResult<P::State>> {
        self.run(x, guess, Some(external))
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    fn run<P: ConcentrationProvider>(
        &self,
        x: ArrayView2<f64>,
        guess: ArrayView2<f64>,
        external: Option<External<P>>,
    ) -> Result<McrResult<P::State>> {
        let (kind, n_species) = init::classify(x.dim(), guess.dim())?;
        let n_samples = x.nrows();
        let constraints = self
            .config
            .resolve(n_species, n_samples, external.is_some())?;

        let init = initialize(x, guess, &self.solver, &self.reconstructor)?;
        debug_assert_eq!((init.kind, init.n_species), (kind, n_species));
        let x_pca = init.x_pca;
        let mut c = init.c;
        let mut st = init.st;

        let mut history = IterationLog::new(self.config.verbose);
        for warning in &constraints.warnings {
            history.warn(warning.clone());
        }

        let mut provider = match (external, &constraints.external) {
            (Some(ext), Some(_)) => Some((ext.provider, Some(ext.state))),
            _ => None,
        };
        let mut external_output: Option<ExternalOutput<P::State>> = None;

        let mut controller = ConvergenceController::new(
            self.config.tol,
            self.config.maxit,
            self.config.maxdiv,
            std_dev(x),
        );
        let mut c_hard = c.clone();
        let mut st_soft = st.clone();

        let terminal = loop {
            if let Some(state) = controller.status() {
                break state;
            }
            if self.cancelled() {
                break TerminalState::Cancelled;
            }

            c = fit_concentrations(&self.solver, x, st.view(), "refitting concentrations")?;
            self.constrain_concentrations(
                &mut c,
                &constraints,
                &mut provider,
                &mut external_output,
            )?;

            c_hard = c.clone();
            st = fit_spectra(&self.solver, x, c.view(), "fitting spectra to constrained concentrations")?;
            c = fit_concentrations(&self.solver, x, st.view(), "refitting concentrations for consistency")?;
            st_soft = st.clone();

            for_each_row(&mut st, &constraints.nonneg_spec, nonneg);
            if let Some(method) = constraints.norm_spec {
                let skipped = normalize_spectra(&mut c, &mut st, method)
                    .map_err(McrError::projection("spectral normalization"))?;
                if skipped > 0 {
                    log::debug!("{} spectra with zero scale left unnormalized", skipped);
                }
            }
            debug_assert_eq!(c.dim(), (n_samples, n_species));
            debug_assert_eq!(st.dim(), (n_species, x.ncols()));

            let x_hat = c.dot(&st);
            let error_exp = std_dev((&x_hat - &x).view());
            let error_pca = std_dev((&x_hat - &x_pca).view());
            let step = controller.record(error_exp);

            history.push(IterationRecord {
                iteration: controller.iterations(),
                error_pca,
                error_exp,
                change: step.change,
                divergence_count: step.divergence_count,
            });
        };
        history.finish(terminal, self.config.maxit, self.config.maxdiv);

        Ok(McrResult {
            x: x.to_owned(),
            x_pca,
            c,
            st,
            c_hard,
            st_soft,
            external: external_output,
            history,
            config: self.config.clone(),
            guess_kind: kind,
            terminal,
        })
    }

    /// Concentration side of the constraint engine, in place.
    fn constrain_concentrations<P: ConcentrationProvider>(
        &self,
        c: &mut Array2<f64>,
        constraints: &Constraints,
        provider: &mut Option<(P, Option<P::State>)>,
        external_output: &mut Option<ExternalOutput<P::State>>,
    ) -> Result<()> {
        for_each_column(c, &constraints.nonneg_conc, nonneg);

        let (tol, mode) = (constraints.unimod_tol, constraints.unimod_mod);
        for_each_column(c, &constraints.unimod_conc, |col| unimodal(col, tol, mode));

        let tol = constraints.mono_inc_tol;
        for_each_column(c, &constraints.mono_inc_conc, |col| monotonic_increase(col, tol));

        let tol = constraints.mono_dec_tol;
        for_each_column(c, &constraints.mono_dec_conc, |col| monotonic_decrease(col, tol));

        if let Some(closure) = &constraints.closure {
            match closure.method {
                ClosureMethod::Scaling => {
                    closure_scaling(c, &closure.species, closure.target.view(), &self.solver)
                        .map_err(McrError::solve("applying closure"))?;
                }
                ClosureMethod::ConstantSum => {
                    let skipped = closure_constant_sum(c, &closure.species, closure.target.view())
                        .map_err(McrError::projection("closure"))?;
                    if skipped > 0 {
                        log::debug!("{} samples with zero total left unclosed", skipped);
                    }
                }
            }
        }

        if let (Some(mapping), Some((provider, state))) = (&constraints.external, provider.as_mut()) {
            let current = state
                .take()
                .ok_or_else(|| McrError::External(anyhow::anyhow!("provider state lost")))?;
            let (profiles, next) = provider
                .provide(c.view(), &mapping.targets, &mapping.to_conc, current)
                .map_err(McrError::External)?;

            let expected = (c.nrows(), mapping.to_conc.len());
            if profiles.dim() != expected {
                return Err(McrError::ExternalShape {
                    expected,
                    got: profiles.dim(),
                });
            }
            if !all_finite(profiles.view()) {
                return Err(McrError::NonFinite("external concentration provider"));
            }
            for (j, target) in mapping.to_conc.iter().enumerate() {
                if let Some(col) = target {
                    c.column_mut(*col).assign(&profiles.column(j));
                }
            }

            *state = Some(next.clone());
            *external_output = Some(ExternalOutput {
                profiles,
                state: next,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Axis};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn gaussian(n: usize, center: f64, width: f64) -> Array1<f64> {
        Array1::from_shape_fn(n, |i| (-((i as f64 - center) / width).powi(2)).exp())
    }

    /// Elution profiles (`m × peaks`) of single-peaked species.
    fn elution(m: usize, peaks: &[f64]) -> Array2<f64> {
        let mut c = Array2::zeros((m, peaks.len()));
        for (k, &p) in peaks.iter().enumerate() {
            c.column_mut(k).assign(&gaussian(m, p, 8.0));
        }
        c
    }

    /// Non-negative spectra (`bands × n`) sitting on a small baseline.
    fn spectra(n: usize, bands: &[f64]) -> Array2<f64> {
        let mut st = Array2::zeros((bands.len(), n));
        for (k, &b) in bands.iter().enumerate() {
            st.row_mut(k).assign(&(gaussian(n, b, 4.0) + 0.05));
        }
        st
    }

    fn noisy(x: &Array2<f64>, amplitude: f64, seed: u64) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let noise = Array2::from_shape_fn(x.dim(), |_| rng.random_range(-amplitude..amplitude));
        x + &noise
    }

    fn two_species() -> (Array2<f64>, Array2<f64>, Array2<f64>) {
        let c0 = elution(50, &[15.0, 32.0]);
        let st0 = spectra(30, &[8.0, 20.0]);
        let x = noisy(&c0.dot(&st0), 1e-3, 42);
        (x, c0, st0)
    }

    fn scaled_columns(c: &Array2<f64>, factors: &[f64]) -> Array2<f64> {
        c * &Array1::from(factors.to_vec())
    }

    /// Noise-free `X = C0·St0` of two single-peaked species.
    fn exact_two_species() -> (Array2<f64>, Array2<f64>, Array2<f64>) {
        let c0 = elution(50, &[15.0, 32.0]);
        let st0 = spectra(30, &[8.0, 20.0]);
        (c0.dot(&st0), c0, st0)
    }

    /// A → B first-order kinetics: a decaying and a rising profile that sum
    /// to one in every sample.
    fn kinetic() -> (Array2<f64>, Array2<f64>) {
        let mut c0 = Array2::zeros((50, 2));
        for i in 0..50 {
            let a = (-(i as f64) / 15.0).exp();
            c0[[i, 0]] = a;
            c0[[i, 1]] = 1.0 - a;
        }
        let st0 = spectra(30, &[8.0, 20.0]);
        (c0.dot(&st0), c0)
    }

    fn assert_unimodal(c: &Array2<f64>, tol: f64) {
        for col in c.axis_iter(Axis(1)) {
            let peak = col
                .iter()
                .enumerate()
                .fold(0, |best, (i, &v)| if v > col[best] { i } else { best });
            for i in 0..peak {
                assert!(col[i] <= col[i + 1] * tol + 1e-12, "{} rises late at {}", col, i);
            }
            for i in peak..col.len() - 1 {
                assert!(col[i + 1] <= col[i] * tol + 1e-12, "{} rises again at {}", col, i);
            }
        }
    }

    #[test]
    fn test_converges_on_exact_mixture() {
        init_logger();
        let (x, c0, _) = exact_two_species();
        let guess = scaled_columns(&c0, &[1.3, 0.7]);

        let mcr = McrAlsBuilder::new().build().unwrap();
        let result = mcr.fit(x.view(), guess.view()).unwrap();

        assert_eq!(result.terminal_state(), TerminalState::Converged);
        assert!(result.converged());
        assert!(result.iterations() < mcr.config().maxit);
        assert_eq!(result.guess_kind(), GuessKind::Concentration);

        let last = result.history().last().unwrap();
        assert!(last.change.abs() < mcr.config().tol);
        assert!(last.error_exp < 1e-10);

        let x_hat = result.reconstruct();
        for (a, b) in x_hat.iter().zip(x.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
        assert!(result.log().contains("converged !"));
    }

    #[test]
    fn test_converges_on_noisy_mixture() {
        let (x, c0, _) = two_species();
        let guess = scaled_columns(&c0, &[1.3, 0.7]);

        let mcr = McrAlsBuilder::new().build().unwrap();
        let result = mcr.fit(x.view(), guess.view()).unwrap();

        assert_eq!(result.terminal_state(), TerminalState::Converged);
        assert!(result.iterations() < mcr.config().maxit);

        let last = result.history().last().unwrap();
        assert!(last.change.abs() < mcr.config().tol);
        // uniform noise of amplitude 1e-3 has a standard deviation of ~5.8e-4
        assert!(last.error_exp < 2e-3, "error_exp = {}", last.error_exp);

        let x_hat = result.reconstruct();
        for (a, b) in x_hat.iter().zip(x.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 5e-3);
        }
    }

    #[test]
    fn test_monotonic_profiles_on_hard_snapshot() {
        let (x, c0) = kinetic();
        let x = noisy(&x, 1e-3, 11);
        let guess = scaled_columns(&c0, &[1.2, 0.8]);

        let result = McrAlsBuilder::new()
            .config(McrConfig::new().mono_dec([0], 1.0).mono_inc([1], 1.0).maxit(10))
            .build()
            .unwrap()
            .fit(x.view(), guess.view())
            .unwrap();

        let c = result.c_hard();
        for i in 1..c.nrows() {
            assert!(c[[i, 0]] <= c[[i - 1, 0]], "species 0 rises at {}", i);
            assert!(c[[i, 1]] >= c[[i - 1, 1]], "species 1 falls at {}", i);
        }
    }

    #[test]
    fn test_smooth_unimodality_on_hard_snapshot() {
        let (x, c0, _) = two_species();
        let x = noisy(&x, 5e-3, 3);
        let guess = scaled_columns(&c0, &[1.3, 0.7]);

        let result = McrAlsBuilder::new()
            .config(
                McrConfig::new()
                    .unimod_mod(UnimodMode::Smooth)
                    .unimod_tol(1.05)
                    .maxit(10),
            )
            .build()
            .unwrap()
            .fit(x.view(), guess.view())
            .unwrap();

        assert_unimodal(result.c_hard(), 1.05);
    }

    #[test]
    fn test_scaling_closure_on_hard_snapshot() {
        let (x, c0) = kinetic();
        let guess = scaled_columns(&c0, &[1.5, 0.6]);

        let result = McrAlsBuilder::new()
            .config(McrConfig::new().closure(
                [0, 1],
                ClosureTarget::Constant(1.0),
                ClosureMethod::Scaling,
            ))
            .build()
            .unwrap()
            .fit(x.view(), guess.view())
            .unwrap();

        for row in result.c_hard().rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-8);
        }
        for (a, b) in result.c_hard().iter().zip(c0.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_max_normalization() {
        let (x, c0, _) = two_species();
        let guess = scaled_columns(&c0, &[1.3, 0.7]);
        let result = McrAlsBuilder::new()
            .config(McrConfig::new().norm_spec(Some(NormMethod::Max)))
            .build()
            .unwrap()
            .fit(x.view(), guess.view())
            .unwrap();

        for row in result.st().rows() {
            let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
            assert_abs_diff_eq!(max, 1.0, epsilon = 1e-12);
        }
    }

    /// Exact least squares whose k-th solution is scaled by `1 + k / 10`.
    struct Drifting {
        inner: SvdLeastSquares,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl LeastSquares for Drifting {
        fn solve(
            &self,
            a: ArrayView2<f64>,
            b: ArrayView2<f64>,
        ) -> std::result::Result<Array2<f64>, crate::lstsq::SolveError> {
            let k = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.inner.solve(a, b)? * (1.0 + k as f64 / 10.0))
        }
    }

    #[test]
    fn test_divergence_stop() {
        let (x, c0, _) = exact_two_species();
        let solver = Drifting {
            inner: SvdLeastSquares::new(),
            calls: std::sync::atomic::AtomicUsize::new(0),
        };

        // C·St equals X scaled by the last factor of each iteration, so the
        // residual grows from the second iteration on
        let result = McrAlsBuilder::new()
            .config(McrConfig::new().tol(0.0).maxdiv(3))
            .solver(solver)
            .build()
            .unwrap()
            .fit(x.view(), c0.view())
            .unwrap();

        assert_eq!(result.terminal_state(), TerminalState::DivergenceStopped);
        assert_eq!(result.iterations(), 4);
        let counts: Vec<usize> = result
            .history()
            .records()
            .iter()
            .map(|r| r.divergence_count)
            .collect();
        assert_eq!(counts, vec![0, 1, 2, 3]);
        assert!(result.log().contains("not improved since 3 iterations"));
    }

    #[test]
    fn test_three_species_guess_shapes() {
        let c0 = elution(50, &[10.0, 25.0, 38.0]);
        let st0 = spectra(30, &[6.0, 15.0, 24.0]);
        let x = noisy(&c0.dot(&st0), 1e-3, 7);
        let guess = scaled_columns(&c0, &[1.0, 2.0, 0.5]);

        let mcr = McrAlsBuilder::new()
            .config(McrConfig::new().maxit(5))
            .build()
            .unwrap();
        let result = mcr.fit(x.view(), guess.view()).unwrap();

        assert_eq!(result.n_species(), 3);
        assert_eq!(result.c().dim(), (50, 3));
        assert_eq!(result.st().dim(), (3, 30));
        assert_eq!(result.c_hard().dim(), (50, 3));
        assert_eq!(result.st_soft().dim(), (3, 30));
        assert_eq!(result.pca_reference().dim(), (50, 30));
        assert!(result.iterations() <= 5);
    }

    #[test]
    fn test_spectra_guess() {
        let (x, _, st0) = two_species();
        let guess = &st0 * 2.0;

        let result = McrAlsBuilder::new()
            .build()
            .unwrap()
            .fit(x.view(), guess.view())
            .unwrap();

        assert_eq!(result.guess_kind(), GuessKind::Spectra);
        assert_eq!(result.c().dim(), (50, 2));
        assert_eq!(result.st().dim(), (2, 30));
        assert!(result.iterations() >= 1);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let (x, _, _) = two_species();
        let guess = Array2::<f64>::ones((40, 2));
        let res = McrAlsBuilder::new().build().unwrap().fit(x.view(), guess.view());
        assert!(matches!(res, Err(McrError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_external_conc_without_provider() {
        let (x, c0, _) = two_species();
        let mcr = McrAlsBuilder::new()
            .config(McrConfig::new().external([1], None))
            .build()
            .unwrap();
        assert!(matches!(
            mcr.fit(x.view(), c0.view()),
            Err(McrError::MissingExternalProvider)
        ));
    }

    #[test]
    fn test_invalid_config_fails_at_build() {
        assert!(matches!(
            McrAlsBuilder::new().config(McrConfig::new().maxit(0)).build(),
            Err(McrError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_constraints_hold_on_snapshots() {
        let (x, c0, _) = two_species();
        let guess = scaled_columns(&c0, &[1.3, 0.7]);
        let result = McrAlsBuilder::new()
            .config(McrConfig::new().maxit(3))
            .build()
            .unwrap()
            .fit(x.view(), guess.view())
            .unwrap();

        assert!(result.c_hard().iter().all(|&v| v >= 0.0));
        assert!(result.st().iter().all(|&v| v >= 0.0));

        assert_unimodal(result.c_hard(), 1.1);
    }

    #[test]
    fn test_constant_sum_closure_on_hard_profiles() {
        let (x, c0, _) = two_species();
        let guess = scaled_columns(&c0, &[1.3, 0.7]);
        let result = McrAlsBuilder::new()
            .config(
                McrConfig::new()
                    .maxit(4)
                    .closure([0, 1], ClosureTarget::Constant(1.0), ClosureMethod::ConstantSum),
            )
            .build()
            .unwrap()
            .fit(x.view(), guess.view())
            .unwrap();

        for row in result.c_hard().rows() {
            let sum = row.sum();
            if sum != 0.0 {
                assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_euclid_normalization() {
        let (x, c0, _) = two_species();
        let guess = scaled_columns(&c0, &[1.3, 0.7]);
        let result = McrAlsBuilder::new()
            .config(McrConfig::new().norm_spec(Some(NormMethod::Euclid)))
            .build()
            .unwrap()
            .fit(x.view(), guess.view())
            .unwrap();

        for row in result.st().rows() {
            assert_abs_diff_eq!(row.dot(&row).sqrt(), 1.0, epsilon = 1e-10);
        }
        let x_hat = result.reconstruct();
        for (a, b) in x_hat.iter().zip(x.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 5e-3);
        }
    }

    #[test]
    fn test_divergence_counter_in_history() {
        let (x, c0, _) = two_species();
        let guess = scaled_columns(&c0, &[1.3, 0.7]);
        let result = McrAlsBuilder::new()
            .config(McrConfig::new().tol(0.0).maxit(8))
            .build()
            .unwrap()
            .fit(x.view(), guess.view())
            .unwrap();

        let mut previous = 0;
        for (i, record) in result.history().records().iter().enumerate() {
            assert_eq!(record.iteration, i + 1);
            if record.change > 0.0 {
                assert_eq!(record.divergence_count, previous + 1);
            } else {
                assert_eq!(record.divergence_count, 0);
            }
            previous = record.divergence_count;
        }
        assert_ne!(result.terminal_state(), TerminalState::Converged);
    }

    #[test]
    fn test_single_iteration_limit() {
        let (x, c0, _) = two_species();
        let result = McrAlsBuilder::new()
            .config(McrConfig::new().maxit(1))
            .build()
            .unwrap()
            .fit(x.view(), c0.view())
            .unwrap();
        assert_eq!(result.terminal_state(), TerminalState::MaxIterReached);
        assert_eq!(result.iterations(), 1);
        assert!(result.log().contains("not reached after 1 iterations"));
    }

    #[test]
    fn test_external_profiles_are_injected() {
        let (x, c0, _) = two_species();
        let guess = scaled_columns(&c0, &[1.3, 0.7]);
        let model = c0.column(1).to_owned();

        let provider = FnProvider::new(
            move |c: ArrayView2<f64>, targets: &[usize], _to_conc: &[Option<usize>], calls: usize| {
                let mut profiles = Array2::zeros((c.nrows(), targets.len()));
                profiles.column_mut(0).assign(&model);
                Ok((profiles, calls + 1))
            },
        );

        let mcr = McrAlsBuilder::new()
            .config(McrConfig::new().external([1], None))
            .build()
            .unwrap();
        let result = mcr
            .fit_with_external(x.view(), guess.view(), External::new(provider, 0usize))
            .unwrap();

        for (a, b) in result.c_hard().column(1).iter().zip(c0.column(1).iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
        let output = result.external().unwrap();
        assert_eq!(output.state, result.iterations());
        assert_eq!(output.profiles.dim(), (50, 1));
    }

    #[test]
    fn test_external_provider_error_propagates() {
        let (x, c0, _) = two_species();
        let provider = FnProvider::new(
            |_c: ArrayView2<f64>, _t: &[usize], _m: &[Option<usize>], _s: ()| {
                Err(anyhow::anyhow!("kinetic model failed"))
            },
        );
        let res = McrAlsBuilder::new()
            .config(McrConfig::new().external([0], None))
            .build()
            .unwrap()
            .fit_with_external(x.view(), c0.view(), External::new(provider, ()));
        assert!(matches!(res, Err(McrError::External(_))));
    }

    #[test]
    fn test_external_provider_wrong_shape() {
        let (x, c0, _) = two_species();
        let provider = FnProvider::new(
            |c: ArrayView2<f64>, _t: &[usize], _m: &[Option<usize>], s: ()| {
                Ok((Array2::zeros((c.nrows(), 2)), s))
            },
        );
        let res = McrAlsBuilder::new()
            .config(McrConfig::new().external([0], None))
            .build()
            .unwrap()
            .fit_with_external(x.view(), c0.view(), External::new(provider, ()));
        assert!(matches!(res, Err(McrError::ExternalShape { .. })));
    }

    #[test]
    fn test_cancelled_before_first_iteration() {
        let (x, c0, _) = two_species();
        let flag = Arc::new(AtomicBool::new(true));
        let result = McrAlsBuilder::new()
            .cancel_flag(flag)
            .build()
            .unwrap()
            .fit(x.view(), c0.view())
            .unwrap();
        assert_eq!(result.terminal_state(), TerminalState::Cancelled);
        assert_eq!(result.iterations(), 0);
        assert_eq!(result.c_hard(), result.c());
    }

    #[test]
    fn test_merit_and_transform() {
        let (x, c0, _) = two_species();
        let result = McrAlsBuilder::new()
            .config(McrConfig::new().maxit(2))
            .build()
            .unwrap()
            .fit(x.view(), c0.view())
            .unwrap();

        let merit = result.merit();
        assert_eq!(&merit.x, result.x());
        let recombined = &merit.x_hat + &merit.residual;
        for (a, b) in recombined.iter().zip(x.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }

        let (c, st) = result.transform();
        assert_eq!(&c, result.c());
        assert_eq!(&st, result.st());
    }
}
