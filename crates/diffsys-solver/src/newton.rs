//! Damped Newton iteration used by implicit backends.

use diffsys_core::{ErrorKind, SolverError, SolverResult};
use nalgebra::{DMatrix, DVector};

/// Newton iteration configuration.
#[derive(Clone, Debug)]
pub struct NewtonConfig {
    /// Maximum iterations
    pub max_iterations: usize,
    /// Absolute tolerance for residual norm
    pub abs_tol: f64,
    /// Relative tolerance for residual norm
    pub rel_tol: f64,
    /// Line search backtracking factor
    pub line_search_beta: f64,
    /// Maximum line search iterations
    pub max_line_search_iters: usize,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_iterations: 7,
            abs_tol: 1e-12,
            rel_tol: 1e-10,
            line_search_beta: 0.5,
            max_line_search_iters: 10,
        }
    }
}

/// Newton iteration result.
#[derive(Debug)]
pub struct NewtonResult {
    /// Solution vector
    pub x: DVector<f64>,
    /// Final residual norm
    pub residual_norm: f64,
    /// Number of iterations
    pub iterations: usize,
}

/// Damped Newton solve of `residual_fn(x) = 0` with backtracking line search.
///
/// Non-convergence and a singular iteration matrix both surface as
/// [`ErrorKind::ConvergenceFailure`]; errors raised by the residual or
/// Jacobian closures propagate unchanged.
pub fn newton_solve<F, J>(
    x0: DVector<f64>,
    residual_fn: F,
    jacobian_fn: J,
    config: &NewtonConfig,
) -> SolverResult<NewtonResult>
where
    F: Fn(&DVector<f64>) -> SolverResult<DVector<f64>>,
    J: Fn(&DVector<f64>) -> SolverResult<DMatrix<f64>>,
{
    const SOURCE: &str = "newton_solve";

    let mut x = x0;
    let mut r = residual_fn(&x)?;
    let mut r_norm = r.norm();
    let r0_norm = r_norm.max(1.0);

    for iter in 0..config.max_iterations {
        if r_norm < config.abs_tol || r_norm < config.rel_tol * r0_norm {
            return Ok(NewtonResult {
                x,
                residual_norm: r_norm,
                iterations: iter,
            });
        }

        let jac = jacobian_fn(&x)?;

        // Solve J * dx = -r
        let dx = jac.lu().solve(&(-r.clone())).ok_or_else(|| {
            SolverError::new(
                ErrorKind::ConvergenceFailure,
                SOURCE,
                "singular iteration matrix",
            )
        })?;

        // Backtracking line search on the residual norm
        let mut alpha = 1.0;
        let mut x_new = &x + alpha * &dx;
        let mut r_new = residual_fn(&x_new)?;
        let mut r_new_norm = r_new.norm();

        for _ in 0..config.max_line_search_iters {
            if r_new_norm < r_norm {
                break;
            }
            alpha *= config.line_search_beta;
            x_new = &x + alpha * &dx;
            r_new = residual_fn(&x_new)?;
            r_new_norm = r_new.norm();
        }

        x = x_new;
        r = r_new;
        r_norm = r_new_norm;

        if alpha < 1e-10 {
            return Err(SolverError::new(
                ErrorKind::ConvergenceFailure,
                SOURCE,
                format!("line search stagnated at iteration {iter}"),
            ));
        }
    }

    if r_norm < config.abs_tol || r_norm < config.rel_tol * r0_norm {
        return Ok(NewtonResult {
            x,
            residual_norm: r_norm,
            iterations: config.max_iterations,
        });
    }

    Err(SolverError::new(
        ErrorKind::ConvergenceFailure,
        SOURCE,
        format!(
            "maximum iterations {} reached, residual = {r_norm}",
            config.max_iterations
        ),
    ))
}
