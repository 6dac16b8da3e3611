//! Finite difference Jacobian computation.

use diffsys_core::SolverResult;
use nalgebra::{DMatrix, DVector};

/// Compute a dense Jacobian using forward finite differences.
///
/// For each column j, perturbs x[j] and computes (f(x + e_j) - f(x)) / dx.
pub fn finite_difference_jacobian<F>(
    x: &DVector<f64>,
    f: F,
    epsilon: f64,
) -> SolverResult<DMatrix<f64>>
where
    F: Fn(&DVector<f64>) -> SolverResult<DVector<f64>>,
{
    let n = x.len();
    let f_x = f(x)?;
    let m = f_x.len();

    let mut jac = DMatrix::zeros(m, n);

    for j in 0..n {
        let mut x_perturbed = x.clone();
        let dx = epsilon * x[j].abs().max(1.0);
        x_perturbed[j] += dx;

        let f_perturbed = f(&x_perturbed)?;
        let df = (f_perturbed - &f_x) / dx;

        for i in 0..m {
            jac[(i, j)] = df[i];
        }
    }

    Ok(jac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_function_recovers_matrix() {
        // f(x) = A x with A = [[2, 1], [0, -3]]
        let f = |x: &DVector<f64>| -> SolverResult<DVector<f64>> {
            Ok(DVector::from_vec(vec![
                2.0 * x[0] + x[1],
                -3.0 * x[1],
            ]))
        };

        let x = DVector::from_vec(vec![1.0, 2.0]);
        let jac = finite_difference_jacobian(&x, f, 1e-7).unwrap();

        assert!((jac[(0, 0)] - 2.0).abs() < 1e-5);
        assert!((jac[(0, 1)] - 1.0).abs() < 1e-5);
        assert!(jac[(1, 0)].abs() < 1e-5);
        assert!((jac[(1, 1)] + 3.0).abs() < 1e-5);
    }
}
