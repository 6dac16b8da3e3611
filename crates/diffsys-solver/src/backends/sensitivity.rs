//! Sensitivity propagation shared by the backends.

use diffsys_core::{ErrorKind, SolverError, SolverResult};
use nalgebra::{DMatrix, DVector};

use crate::model::{EvalOutcome, ModelCallback};

/// Advance the sensitivity matrix over one accepted internal step.
///
/// Columns of `sens` are the per-parameter sensitivity vectors
/// s_j = dy/dp_j. Each column receives one explicit Euler update
/// s_j += dt * sensitivity_rhs(t, y, ydot, j, s_j), so the model's
/// sensitivity RHS is invoked exactly once per parameter per step.
/// `ydot` is the ODE RHS value at (t, y).
pub fn advance_sensitivities(
    model: &dyn ModelCallback,
    t: f64,
    y: &DVector<f64>,
    ydot: &DVector<f64>,
    dt: f64,
    sens: &mut DMatrix<f64>,
) -> SolverResult<()> {
    const SOURCE: &str = "sensitivity_step";

    let n = sens.nrows();
    let mut ys_dot = DVector::zeros(n);

    for j in 0..sens.ncols() {
        let y_s = DVector::from_iterator(n, sens.column(j).iter().copied());
        match model.sensitivity_rhs(t, y, ydot, j, &y_s, &mut ys_dot) {
            EvalOutcome::Ok => {}
            EvalOutcome::Recoverable => {
                return Err(SolverError::new(
                    ErrorKind::RepeatedTestFailure,
                    SOURCE,
                    format!("sensitivity RHS reported a recoverable error for parameter {j}"),
                ));
            }
            EvalOutcome::Fatal => {
                return Err(SolverError::failure(
                    SOURCE,
                    format!("sensitivity RHS evaluation failed for parameter {j}"),
                ));
            }
        }
        for i in 0..n {
            sens[(i, j)] += dt * ys_dot[i];
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    // dy/dt = -p * y with one parameter; s' = -p*s - y
    struct DecayWithParam {
        p: f64,
        calls: Cell<usize>,
    }

    impl ModelCallback for DecayWithParam {
        fn ode_rhs(
            &self,
            _t: f64,
            y: &DVector<f64>,
            _params: &DVector<f64>,
            ydot: &mut DVector<f64>,
        ) -> EvalOutcome {
            ydot[0] = -self.p * y[0];
            EvalOutcome::Ok
        }

        fn sensitivity_rhs(
            &self,
            _t: f64,
            y: &DVector<f64>,
            _ydot: &DVector<f64>,
            param_index: usize,
            y_s: &DVector<f64>,
            ys_dot: &mut DVector<f64>,
        ) -> EvalOutcome {
            assert_eq!(param_index, 0);
            self.calls.set(self.calls.get() + 1);
            ys_dot[0] = -self.p * y_s[0] - y[0];
            EvalOutcome::Ok
        }

        fn has_sensitivity(&self) -> bool {
            true
        }
    }

    #[test]
    fn one_call_per_parameter_per_step() {
        let model = DecayWithParam {
            p: 1.0,
            calls: Cell::new(0),
        };
        let y = DVector::from_vec(vec![1.0]);
        let ydot = DVector::from_vec(vec![-1.0]);
        let mut sens = DMatrix::zeros(1, 1);

        advance_sensitivities(&model, 0.0, &y, &ydot, 0.1, &mut sens).unwrap();
        assert_eq!(model.calls.get(), 1);
        // s(0)=0, s' = -1 at the start, so s ~ -0.1 after one Euler step
        assert!((sens[(0, 0)] + 0.1).abs() < 1e-12);

        advance_sensitivities(&model, 0.1, &y, &ydot, 0.1, &mut sens).unwrap();
        assert_eq!(model.calls.get(), 2);
    }
}
