//! ModelCallback: the contract a model exposes to every backend.

use nalgebra::{DMatrix, DVector};

/// Outcome of a single model evaluation.
///
/// `Recoverable` signals the backend may retry with a smaller internal
/// step; `Fatal` signals the current step request must be aborted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvalOutcome {
    Ok,
    Recoverable,
    Fatal,
}

/// Interface the model exposes to the integrator.
///
/// Capabilities are negotiated through the query methods instead of an
/// inheritance hierarchy: an ODE-only model keeps the defaults, a
/// DDE-capable or sensitivity-capable model overrides the matching
/// query together with the evaluation method.
///
/// Evaluation methods take `&self`, must not mutate their inputs, and
/// must be re-entrant within one step (a backend may call the RHS from
/// within a finite-difference Jacobian approximation). A shared callback
/// object is not required to be thread-safe across solver instances;
/// synchronizing shared use is the host's responsibility.
pub trait ModelCallback {
    /// RHS of the ODE system dy/dt = f(t, y).
    ///
    /// `params` holds the sensitivity parameter values (len = number of
    /// sensitivity parameters, possibly 0). Writes f(t, y) into `ydot`.
    fn ode_rhs(
        &self,
        t: f64,
        y: &DVector<f64>,
        params: &DVector<f64>,
        ydot: &mut DVector<f64>,
    ) -> EvalOutcome;

    /// Dense Jacobian of the ODE RHS at (t, y): `jac[(i, j)] = df_i/dy_j`.
    ///
    /// `fy` is the RHS value at (t, y). Only invoked when
    /// [`has_jacobian`](Self::has_jacobian) is true.
    fn ode_jacobian(
        &self,
        _t: f64,
        _y: &DVector<f64>,
        _params: &DVector<f64>,
        _fy: &DVector<f64>,
        _jac: &mut DMatrix<f64>,
    ) -> EvalOutcome {
        EvalOutcome::Fatal
    }

    /// RHS of the DDE system dy/dt = f(t, y, yd).
    ///
    /// `delayed[(i, j)] = y_i(t - delay_j)`. Only invoked when
    /// [`has_delay_equations`](Self::has_delay_equations) is true, and
    /// never with a degenerate delayed buffer while the delay count is
    /// positive.
    fn dde_rhs(
        &self,
        _t: f64,
        _y: &DVector<f64>,
        _delayed: &DMatrix<f64>,
        _ydot: &mut DVector<f64>,
    ) -> EvalOutcome {
        EvalOutcome::Fatal
    }

    /// Current delay values of the DDE system, queried by the backend
    /// before each RHS evaluation when delays are supported.
    fn delays(&self, _t: f64, _y: &DVector<f64>, _delays_out: &mut DVector<f64>) {}

    /// Sensitivity RHS for exactly one parameter at a time.
    ///
    /// Computes (df/dy)·s_i + df/dp_i for `param_index = i` and stores it
    /// in `ys_dot`, where `y_s` is the current sensitivity vector
    /// s_i = dy/dp_i and `ydot` the RHS value at (t, y).
    /// `param_index` ranges over [0, number of sensitivity parameters).
    /// The backend invokes this once per parameter per internal step.
    fn sensitivity_rhs(
        &self,
        _t: f64,
        _y: &DVector<f64>,
        _ydot: &DVector<f64>,
        _param_index: usize,
        _y_s: &DVector<f64>,
        _ys_dot: &mut DVector<f64>,
    ) -> EvalOutcome {
        EvalOutcome::Fatal
    }

    /// True if the model provides an ODE RHS.
    fn has_ode_rhs(&self) -> bool {
        true
    }

    /// True if the model provides an analytic Jacobian.
    fn has_jacobian(&self) -> bool {
        false
    }

    /// True if the model provides a per-parameter sensitivity RHS.
    fn has_sensitivity(&self) -> bool {
        false
    }

    /// True if the model is a DDE system (delayed-state RHS + delays).
    fn has_delay_equations(&self) -> bool {
        false
    }

    /// True if a banded linear solver should be used where available.
    fn use_banded_linear_solver(&self) -> bool {
        false
    }

    /// Lower half-bandwidth; meaningful only with a banded request.
    fn lower_half_bandwidth(&self) -> usize {
        0
    }

    /// Upper half-bandwidth; meaningful only with a banded request.
    fn upper_half_bandwidth(&self) -> usize {
        0
    }
}
