//! Float helpers shared by configuration setters and backends.

use crate::error::{SolverError, SolverResult};

/// Effectively-unbounded magnitude used for option ranges.
pub const UNBOUNDED: f64 = 1e300;

pub fn ensure_finite(v: f64, source_op: &'static str, what: &str) -> SolverResult<f64> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(SolverError::illegal_input(
            source_op,
            format!("{what} must be finite, got {v}"),
        ))
    }
}

pub fn ensure_positive(v: f64, source_op: &'static str, what: &str) -> SolverResult<f64> {
    if v > 0.0 {
        Ok(v)
    } else {
        Err(SolverError::failure(source_op, format!("{what} must be > 0")))
    }
}

/// True if every entry is strictly positive.
pub fn all_positive(values: &[f64]) -> bool {
    values.iter().all(|&v| v > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_positive_rejects_zero_and_negative() {
        assert!(ensure_positive(1e-12, "set_rel_tol", "relative tolerance").is_ok());
        assert!(ensure_positive(0.0, "set_rel_tol", "relative tolerance").is_err());
        assert!(ensure_positive(-1.0, "set_rel_tol", "relative tolerance").is_err());
    }

    #[test]
    fn ensure_finite_detects_nan() {
        let err = ensure_finite(f64::NAN, "set_option", "value").unwrap_err();
        assert!(format!("{err}").contains("finite"));
    }

    #[test]
    fn all_positive_basic() {
        assert!(all_positive(&[1e-6, 1.0, 3.0]));
        assert!(!all_positive(&[1e-6, 0.0]));
        assert!(all_positive(&[]));
    }
}
