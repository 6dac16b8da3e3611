//! Solver configuration owned by the core and read by backends.

/// Problem dimensions, tolerances, and step-size hints.
///
/// Mutated only through the `SolverCore` setters prior to initialization
/// (tolerances and step bounds may also change before a reinitialization);
/// backends read it and never write it.
#[derive(Clone, Debug)]
pub struct SolverConfig {
    /// Number of state variables; 0 means "unset".
    pub problem_size: usize,
    /// Number of sensitivity parameters.
    pub sensitivity_parameter_count: usize,
    /// Integration start time.
    pub initial_time: f64,
    /// Initial state, len == problem_size once set.
    pub initial_values: Vec<f64>,
    /// Sensitivity parameter values, len == sensitivity_parameter_count.
    pub sensitivity_parameter_values: Vec<f64>,
    /// Relative tolerance, > 0.
    pub rel_tol: f64,
    /// Per-component absolute tolerances, len == problem_size once set.
    pub abs_tol: Vec<f64>,
    /// Max internal steps per output-time request.
    pub max_internal_steps: usize,
    /// Initial internal step size hint.
    pub initial_step_size: f64,
    /// Minimal internal step size hint.
    pub min_step_size: f64,
    /// Maximal internal step size hint.
    pub max_step_size: f64,
    /// Number of delays (DDE systems only).
    pub delays_count: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            problem_size: 0,
            sensitivity_parameter_count: 0,
            initial_time: 0.0,
            initial_values: Vec::new(),
            sensitivity_parameter_values: Vec::new(),
            rel_tol: 1e-9,
            abs_tol: Vec::new(),
            max_internal_steps: 100_000,
            initial_step_size: 1e-10,
            min_step_size: 0.0,
            max_step_size: 60.0,
            delays_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let cfg = SolverConfig::default();
        assert_eq!(cfg.problem_size, 0);
        assert_eq!(cfg.sensitivity_parameter_count, 0);
        assert_eq!(cfg.rel_tol, 1e-9);
        assert!(cfg.abs_tol.is_empty());
        assert_eq!(cfg.max_internal_steps, 100_000);
        assert_eq!(cfg.initial_step_size, 1e-10);
        assert_eq!(cfg.min_step_size, 0.0);
        assert_eq!(cfg.max_step_size, 60.0);
        assert_eq!(cfg.delays_count, 0);
    }
}
