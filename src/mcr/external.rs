//! External concentration profiles.
//!
//! A provider computes concentration profiles from a model outside the ALS
//! loop (a kinetic scheme, for instance). Whatever it needs to carry between
//! iterations, such as fitted rate constants, travels as an explicit state
//! value: it is handed in with each call and the updated state comes back
//! with the profiles.

use std::marker::PhantomData;

use ndarray::{Array2, ArrayView2};

/// Contract of an external concentration provider.
pub trait ConcentrationProvider {
    type State: Clone;

    /// Returns `(profiles, new_state)`.
    ///
    /// `c` is the current, already constrained concentration matrix,
    /// `targets` the species whose columns will be overwritten and
    /// `to_conc[j]` the column of C receiving output column `j` of the
    /// returned `profiles` (shape `M × to_conc.len()`).
    fn provide(
        &self,
        c: ArrayView2<f64>,
        targets: &[usize],
        to_conc: &[Option<usize>],
        state: Self::State,
    ) -> anyhow::Result<(Array2<f64>, Self::State)>;
}

/// Adapts a plain function or closure into a [`ConcentrationProvider`].
pub struct FnProvider<F, S> {
    f: F,
    _state: PhantomData<fn(S) -> S>,
}

impl<F, S> FnProvider<F, S>
where
    F: Fn(ArrayView2<f64>, &[usize], &[Option<usize>], S) -> anyhow::Result<(Array2<f64>, S)>,
    S: Clone,
{
    pub fn new(f: F) -> Self {
        FnProvider {
            f,
            _state: PhantomData,
        }
    }
}

impl<F, S> ConcentrationProvider for FnProvider<F, S>
where
    F: Fn(ArrayView2<f64>, &[usize], &[Option<usize>], S) -> anyhow::Result<(Array2<f64>, S)>,
    S: Clone,
{
    type State = S;

    fn provide(
        &self,
        c: ArrayView2<f64>,
        targets: &[usize],
        to_conc: &[Option<usize>],
        state: S,
    ) -> anyhow::Result<(Array2<f64>, S)> {
        (self.f)(c, targets, to_conc, state)
    }
}

/// Stand-in provider for runs without external profiles.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProvider;

impl ConcentrationProvider for NoProvider {
    type State = ();

    fn provide(
        &self,
        _c: ArrayView2<f64>,
        _targets: &[usize],
        _to_conc: &[Option<usize>],
        _state: (),
    ) -> anyhow::Result<(Array2<f64>, ())> {
        anyhow::bail!("no external concentration provider configured")
    }
}

/// A provider together with the state passed to its first call.
pub struct External<P: ConcentrationProvider> {
    pub(crate) provider: P,
    pub(crate) state: P::State,
}

impl<P: ConcentrationProvider> External<P> {
    pub fn new(provider: P, initial_state: P::State) -> Self {
        External {
            provider,
            state: initial_state,
        }
    }
}

/// Last profiles and state returned by the external provider.
#[derive(Debug, Clone)]
pub struct ExternalOutput<S> {
    /// Profiles as returned by the provider, before being mapped into C.
    pub profiles: Array2<f64>,
    pub state: S,
}
