//! End-to-end integration: ydot = [-y0, y0] from y = [1, 0].
//!
//! The exact solution is y(t) = [e^-t, 1 - e^-t].

use diffsys_solver::{
    EvalOutcome, ExplicitRungeKutta, ImplicitEuler, ModelCallback, SolverBackend, SolverCore,
};
use nalgebra::{DMatrix, DVector};

struct Cascade;

impl ModelCallback for Cascade {
    fn ode_rhs(
        &self,
        _t: f64,
        y: &DVector<f64>,
        _params: &DVector<f64>,
        ydot: &mut DVector<f64>,
    ) -> EvalOutcome {
        ydot[0] = -y[0];
        ydot[1] = y[0];
        EvalOutcome::Ok
    }

    fn ode_jacobian(
        &self,
        _t: f64,
        _y: &DVector<f64>,
        _params: &DVector<f64>,
        _fy: &DVector<f64>,
        jac: &mut DMatrix<f64>,
    ) -> EvalOutcome {
        jac[(0, 0)] = -1.0;
        jac[(0, 1)] = 0.0;
        jac[(1, 0)] = 1.0;
        jac[(1, 1)] = 0.0;
        EvalOutcome::Ok
    }

    fn has_jacobian(&self) -> bool {
        true
    }
}

fn run_to_one<B: SolverBackend>(backend: B, tolerance: f64) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let model = Cascade;
    let mut s = SolverCore::new(&model, backend, 2, 0);
    s.set_initial_values(vec![1.0, 0.0]);
    s.set_abs_tol(vec![1e-6, 1e-6]).unwrap();
    s.set_rel_tol(1e-9).unwrap();
    s.set_initial_step_size(1e-3);

    s.initialize().unwrap();
    assert!(s.is_initialized());

    let out = s.step(1.0).unwrap();
    assert!(out.status.is_complete(), "status: {:?}", out.status);
    assert_eq!(out.t_reached, 1.0);

    let e1 = (-1.0f64).exp();
    assert!(
        (out.y[0] - e1).abs() < tolerance,
        "y0 = {}, expected {e1}",
        out.y[0]
    );
    assert!(
        (out.y[1] - (1.0 - e1)).abs() < tolerance,
        "y1 = {}, expected {}",
        out.y[1],
        1.0 - e1
    );
    assert!(out.sensitivities.is_none());

    s.terminate();
}

#[test]
fn explicit_rk_reaches_the_analytic_solution() {
    // local error is controlled at 1e-6 per step; allow for accumulation
    run_to_one(ExplicitRungeKutta::new(), 1e-5);
}

#[test]
fn implicit_euler_reaches_the_analytic_solution() {
    // first-order method with a fixed 1e-3 step
    run_to_one(ImplicitEuler::new(), 1e-3);
}

#[test]
fn successive_output_times_walk_the_solution() {
    let model = Cascade;
    let mut s = SolverCore::new(&model, ExplicitRungeKutta::new(), 2, 0);
    s.set_initial_values(vec![1.0, 0.0]);
    s.set_abs_tol_scalar(1e-8).unwrap();
    s.set_initial_step_size(1e-4);
    s.initialize().unwrap();

    for k in 1..=5 {
        let t = 0.2 * k as f64;
        let out = s.step(t).unwrap();
        assert!(out.status.is_complete());
        assert!((out.y[0] - (-t).exp()).abs() < 1e-6);
        // mass conservation of the pair
        assert!((out.y[0] + out.y[1] - 1.0).abs() < 1e-6);
    }
}
