//! Recoverable right-hand-side handling: the offending internal step is
//! retried with a cut-back step size, and the recoverable outcomes that
//! end a step call early carry the matching error kinds.

use std::cell::Cell;

use diffsys_solver::{
    ErrorKind, EvalOutcome, ExplicitRungeKutta, ModelCallback, SolverCore, StepStatus,
};
use nalgebra::DVector;

/// Decay model whose RHS fails recoverably for the first `flaky_evals`
/// evaluations and counts every call.
struct FlakyDecay {
    flaky_evals: usize,
    calls: Cell<usize>,
    recoverable_returns: Cell<usize>,
}

impl FlakyDecay {
    fn new(flaky_evals: usize) -> Self {
        Self {
            flaky_evals,
            calls: Cell::new(0),
            recoverable_returns: Cell::new(0),
        }
    }
}

impl ModelCallback for FlakyDecay {
    fn ode_rhs(
        &self,
        _t: f64,
        y: &DVector<f64>,
        _params: &DVector<f64>,
        ydot: &mut DVector<f64>,
    ) -> EvalOutcome {
        let n = self.calls.get() + 1;
        self.calls.set(n);
        if n <= self.flaky_evals {
            self.recoverable_returns
                .set(self.recoverable_returns.get() + 1);
            return EvalOutcome::Recoverable;
        }
        ydot[0] = -y[0];
        EvalOutcome::Ok
    }
}

fn configured(model: &FlakyDecay) -> SolverCore<'_, ExplicitRungeKutta> {
    let mut s = SolverCore::new(model, ExplicitRungeKutta::new(), 1, 0);
    s.set_initial_values(vec![1.0]);
    s.set_abs_tol(vec![1e-8]).unwrap();
    s.set_initial_step_size(1e-4);
    s
}

#[test]
fn transient_recoverable_rhs_is_retried_with_a_smaller_step() {
    let model = FlakyDecay::new(3);
    let mut s = configured(&model);
    s.initialize().unwrap();

    let out = s.step(0.1).unwrap();
    assert!(out.status.is_complete(), "status: {:?}", out.status);
    assert_eq!(out.t_reached, 0.1);
    assert_eq!(model.recoverable_returns.get(), 3);
    // the retried step finished and later evaluations run normally
    assert!(model.calls.get() > 3);
    assert!((out.y[0] - (-0.1f64).exp()).abs() < 1e-6);
    assert!(s.last_report().is_ok());
}

#[test]
fn persistent_recoverable_rhs_exhausts_the_retry_budget() {
    let model = FlakyDecay::new(usize::MAX);
    let mut s = configured(&model);
    s.initialize().unwrap();

    let out = s.step(0.1).unwrap();
    match &out.status {
        StepStatus::Recoverable(e) => {
            assert_eq!(e.kind(), ErrorKind::RepeatedTestFailure);
        }
        other => panic!("expected repeated test failure, got {other:?}"),
    }
    assert_eq!(out.t_reached, 0.0);
    // default budget is 20 cutbacks of the same internal step
    assert_eq!(model.recoverable_returns.get(), 21);
    assert_eq!(s.last_report().kind, ErrorKind::RepeatedTestFailure);
}

#[test]
fn retry_budget_is_configurable() {
    let model = FlakyDecay::new(usize::MAX);
    let mut s = configured(&model);
    s.set_option("max_step_retries", 5.0).unwrap();
    s.initialize().unwrap();

    let out = s.step(0.1).unwrap();
    assert_eq!(out.status.error().unwrap().kind(), ErrorKind::RepeatedTestFailure);
    assert_eq!(model.recoverable_returns.get(), 6);
}

#[test]
fn accuracy_unreachable_above_the_minimal_step_is_recoverable() {
    struct StiffDecay;
    impl ModelCallback for StiffDecay {
        fn ode_rhs(
            &self,
            _t: f64,
            y: &DVector<f64>,
            _params: &DVector<f64>,
            ydot: &mut DVector<f64>,
        ) -> EvalOutcome {
            ydot[0] = -1e3 * y[0];
            EvalOutcome::Ok
        }
    }

    let model = StiffDecay;
    let mut s = SolverCore::new(&model, ExplicitRungeKutta::new(), 1, 0);
    s.set_initial_values(vec![1.0]);
    s.set_abs_tol(vec![1e-12]).unwrap();
    s.set_rel_tol(1e-9).unwrap();
    // a floor far too coarse for the requested accuracy on a stiff RHS
    s.set_min_step_size(0.1);
    s.initialize().unwrap();

    let out = s.step(1.0).unwrap();
    match &out.status {
        StepStatus::Recoverable(e) => {
            assert_eq!(e.kind(), ErrorKind::AccuracyLimitExceeded);
        }
        other => panic!("expected accuracy limit, got {other:?}"),
    }
    assert_eq!(s.last_report().kind, ErrorKind::AccuracyLimitExceeded);
}
