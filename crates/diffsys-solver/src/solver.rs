//! SolverCore: the lifecycle state machine between model and backend.

use diffsys_core::{
    all_positive, ensure_positive, ErrorKind, ErrorReport, OptionDescriptor, SolverError,
    SolverResult,
};
use tracing::{debug, warn};

use crate::backend::{SolverBackend, StepOutput, StepStatus};
use crate::config::SolverConfig;
use crate::model::ModelCallback;

/// Lifecycle owner binding one externally-owned model to one backend.
///
/// States: Unconfigured → Configured → Initialized → (Stepping,
/// transient) → Terminated. Size-affecting mutations drop an initialized
/// solver back to Configured; `initialize` must succeed again before the
/// next `step`. Termination is guarded: it is idempotent, and any
/// further lifecycle call fails instead of being undefined.
///
/// The model is borrowed for the solver's lifetime, so the borrow
/// checker enforces that it outlives the solver. One instance is
/// single-threaded and synchronous; independent instances may run on
/// separate threads.
pub struct SolverCore<'m, B: SolverBackend> {
    model: &'m dyn ModelCallback,
    backend: B,
    config: SolverConfig,
    initialized: bool,
    terminated: bool,
    last_report: ErrorReport,
}

impl<'m, B: SolverBackend> SolverCore<'m, B> {
    pub fn new(
        model: &'m dyn ModelCallback,
        backend: B,
        problem_size: usize,
        sensitivity_parameter_count: usize,
    ) -> Self {
        let mut solver = Self {
            model,
            backend,
            config: SolverConfig::default(),
            initialized: false,
            terminated: false,
            last_report: ErrorReport::ok(),
        };
        solver.set_problem_size(problem_size);
        solver.set_sensitivity_parameter_count(sensitivity_parameter_count);
        solver
    }

    fn record<T>(&mut self, result: SolverResult<T>) -> SolverResult<T> {
        self.last_report = ErrorReport::from_result(&result);
        result
    }

    // --- configuration -------------------------------------------------

    /// Change the number of state variables.
    ///
    /// Invalidates the initial values and absolute tolerances (both are
    /// cleared, not re-defaulted) and forces re-initialization.
    pub fn set_problem_size(&mut self, problem_size: usize) {
        if self.config.problem_size == problem_size {
            return;
        }
        self.config.problem_size = problem_size;
        self.config.initial_values.clear();
        self.config.abs_tol.clear();
        self.initialized = false;
    }

    pub fn problem_size(&self) -> usize {
        self.config.problem_size
    }

    /// Change the number of sensitivity parameters.
    ///
    /// Invalidates the sensitivity parameter values and forces
    /// re-initialization.
    pub fn set_sensitivity_parameter_count(&mut self, count: usize) {
        if self.config.sensitivity_parameter_count == count {
            return;
        }
        self.config.sensitivity_parameter_count = count;
        self.config.sensitivity_parameter_values.clear();
        self.initialized = false;
    }

    pub fn sensitivity_parameter_count(&self) -> usize {
        self.config.sensitivity_parameter_count
    }

    pub fn set_delays_count(&mut self, delays_count: usize) {
        self.config.delays_count = delays_count;
    }

    pub fn delays_count(&self) -> usize {
        self.config.delays_count
    }

    pub fn set_initial_time(&mut self, initial_time: f64) {
        self.config.initial_time = initial_time;
    }

    pub fn initial_time(&self) -> f64 {
        self.config.initial_time
    }

    pub fn set_initial_values(&mut self, initial_values: Vec<f64>) {
        self.config.initial_values = initial_values;
    }

    pub fn initial_values(&self) -> &[f64] {
        &self.config.initial_values
    }

    pub fn set_sensitivity_parameter_values(&mut self, values: Vec<f64>) {
        self.config.sensitivity_parameter_values = values;
    }

    pub fn sensitivity_parameter_values(&self) -> &[f64] {
        &self.config.sensitivity_parameter_values
    }

    pub fn set_rel_tol(&mut self, rel_tol: f64) -> SolverResult<()> {
        let result =
            ensure_positive(rel_tol, "set_rel_tol", "relative tolerance").map(|v| {
                self.config.rel_tol = v;
            });
        self.record(result)
    }

    pub fn rel_tol(&self) -> f64 {
        self.config.rel_tol
    }

    /// Set per-component absolute tolerances.
    ///
    /// Fails at configuration time when the problem size is unset, the
    /// length does not match it, or any entry is non-positive.
    pub fn set_abs_tol(&mut self, abs_tol: Vec<f64>) -> SolverResult<()> {
        const SOURCE: &str = "set_abs_tol";
        let result = (|| {
            if self.config.problem_size == 0 {
                return Err(SolverError::failure(
                    SOURCE,
                    "cannot set absolute tolerance: problem size not set",
                ));
            }
            if abs_tol.len() != self.config.problem_size {
                return Err(SolverError::failure(
                    SOURCE,
                    "number of absolute tolerances differs from problem size",
                ));
            }
            if !all_positive(&abs_tol) {
                return Err(SolverError::failure(
                    SOURCE,
                    "absolute tolerance entries must be > 0",
                ));
            }
            self.config.abs_tol = abs_tol;
            Ok(())
        })();
        self.record(result)
    }

    /// Set a uniform absolute tolerance for every state variable.
    pub fn set_abs_tol_scalar(&mut self, abs_tol: f64) -> SolverResult<()> {
        const SOURCE: &str = "set_abs_tol";
        let result = (|| {
            if self.config.problem_size == 0 {
                return Err(SolverError::failure(
                    SOURCE,
                    "cannot set absolute tolerance: problem size not set",
                ));
            }
            if abs_tol <= 0.0 {
                return Err(SolverError::failure(SOURCE, "absolute tolerance must be > 0"));
            }
            self.config.abs_tol = vec![abs_tol; self.config.problem_size];
            Ok(())
        })();
        self.record(result)
    }

    pub fn abs_tol(&self) -> &[f64] {
        &self.config.abs_tol
    }

    pub fn set_max_internal_steps(&mut self, max_internal_steps: usize) {
        self.config.max_internal_steps = max_internal_steps;
    }

    pub fn max_internal_steps(&self) -> usize {
        self.config.max_internal_steps
    }

    // Step-size hints are stored as-is; a backend may reject an
    // inconsistent combination at initialize.

    pub fn set_initial_step_size(&mut self, initial_step_size: f64) {
        self.config.initial_step_size = initial_step_size;
    }

    pub fn initial_step_size(&self) -> f64 {
        self.config.initial_step_size
    }

    pub fn set_min_step_size(&mut self, min_step_size: f64) {
        self.config.min_step_size = min_step_size;
    }

    pub fn min_step_size(&self) -> f64 {
        self.config.min_step_size
    }

    pub fn set_max_step_size(&mut self, max_step_size: f64) {
        self.config.max_step_size = max_step_size;
    }

    pub fn max_step_size(&self) -> f64 {
        self.config.max_step_size
    }

    // --- lifecycle ------------------------------------------------------

    /// Validate the configuration, then run backend setup.
    ///
    /// The base validation always runs first; the initialized flag flips
    /// only when backend setup succeeds, so a failed initialization
    /// leaves the solver in the Configured state.
    pub fn initialize(&mut self) -> SolverResult<()> {
        const SOURCE: &str = "initialize";
        let result = (|| {
            if self.terminated {
                return Err(SolverError::failure(SOURCE, "solver was terminated"));
            }
            self.validate()?;
            self.backend.initialize(self.model, &self.config)?;
            self.initialized = true;
            debug!(
                problem_size = self.config.problem_size,
                sensitivity_parameters = self.config.sensitivity_parameter_count,
                "solver initialized"
            );
            Ok(())
        })();
        self.record(result)
    }

    fn validate(&self) -> SolverResult<()> {
        const SOURCE: &str = "initialize";
        if self.config.problem_size == 0 {
            return Err(SolverError::failure(SOURCE, "problem size not set"));
        }
        if self.config.abs_tol.len() != self.config.problem_size {
            return Err(SolverError::failure(
                SOURCE,
                "number of absolute tolerances differs from problem size",
            ));
        }
        if self.config.initial_values.len() != self.config.problem_size {
            return Err(SolverError::failure(
                SOURCE,
                "number of initial value components differs from problem size",
            ));
        }
        if self.config.sensitivity_parameter_values.len()
            != self.config.sensitivity_parameter_count
        {
            return Err(SolverError::failure(
                SOURCE,
                "number of sensitivity parameter values differs from the number of sensitivity parameters",
            ));
        }
        Ok(())
    }

    /// Request the solution at `t_out`.
    ///
    /// Recoverable and fatal numerical outcomes are carried inside the
    /// returned [`StepOutput`]; the solver stays initialized and usable
    /// either way. An `Err` here means a lifecycle precondition was
    /// violated and no stepping was attempted.
    pub fn step(&mut self, t_out: f64) -> SolverResult<StepOutput> {
        const SOURCE: &str = "step";
        if self.terminated {
            let err = SolverError::failure(SOURCE, "solver was terminated");
            self.last_report = ErrorReport::from(err.clone());
            return Err(err);
        }
        if !self.initialized {
            let err = SolverError::failure(SOURCE, "solver was not initialized");
            self.last_report = ErrorReport::from(err.clone());
            return Err(err);
        }

        let model = self.model;
        match self.backend.step(model, &self.config, t_out) {
            Ok(out) => {
                match &out.status {
                    StepStatus::Complete => self.last_report = ErrorReport::ok(),
                    StepStatus::Recoverable(e) => {
                        warn!(t_reached = out.t_reached, error = %e, "recoverable step outcome");
                        self.last_report = ErrorReport::from(e.clone());
                    }
                    StepStatus::Fatal(e) => {
                        warn!(t_reached = out.t_reached, error = %e, "fatal step outcome");
                        self.last_report = ErrorReport::from(e.clone());
                    }
                }
                Ok(out)
            }
            Err(e) => {
                self.last_report = ErrorReport::from(e.clone());
                Err(e)
            }
        }
    }

    /// Restart integration from (`t0`, `y0`) after a discontinuity.
    ///
    /// Tolerances and step bounds carry over unless changed beforehand;
    /// the backend discards its internal history. The solver must be
    /// initialized.
    pub fn reinitialize(&mut self, t0: f64, y0: &[f64]) -> SolverResult<()> {
        const SOURCE: &str = "reinitialize";
        let result = (|| {
            if self.terminated {
                return Err(SolverError::failure(SOURCE, "solver was terminated"));
            }
            if !self.initialized {
                return Err(SolverError::failure(SOURCE, "solver was not initialized"));
            }
            if y0.len() != self.config.problem_size {
                return Err(SolverError::failure(
                    SOURCE,
                    "initial value has invalid number of components",
                ));
            }
            self.config.initial_values = y0.to_vec();
            self.config.initial_time = t0;
            self.backend.reinitialize(self.model, &self.config)?;
            debug!(t0, "solver reinitialized");
            Ok(())
        })();
        self.record(result)
    }

    /// Release backend resources. Idempotent; any later lifecycle call
    /// fails with a guarded error instead of being undefined.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.backend.terminate();
        self.terminated = true;
        self.initialized = false;
        debug!("solver terminated");
    }

    // --- backend passthrough --------------------------------------------

    /// Descriptors of the backend's non-standard tunables.
    pub fn options_info(&self) -> Vec<OptionDescriptor> {
        self.backend.options()
    }

    /// Set a backend tunable by name.
    pub fn set_option(&mut self, name: &str, value: f64) -> SolverResult<()> {
        let result = self.backend.set_option(name, value);
        self.record(result)
    }

    /// Human-readable message for a backend-specific return code.
    pub fn error_message(&self, code: i32) -> String {
        self.backend.describe_return_code(code)
    }

    /// Error classification for a backend-specific return code.
    pub fn error_kind(&self, code: i32) -> ErrorKind {
        self.backend.kind_from_return_code(code)
    }

    // --- introspection --------------------------------------------------

    pub fn model(&self) -> &dyn ModelCallback {
        self.model
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Report of the most recent operation; `is_ok()` when it succeeded.
    pub fn last_report(&self) -> &ErrorReport {
        &self.last_report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::ExplicitRungeKutta;
    use crate::model::EvalOutcome;
    use nalgebra::DVector;

    struct Decay;

    impl ModelCallback for Decay {
        fn ode_rhs(
            &self,
            _t: f64,
            y: &DVector<f64>,
            _params: &DVector<f64>,
            ydot: &mut DVector<f64>,
        ) -> EvalOutcome {
            ydot[0] = -y[0];
            EvalOutcome::Ok
        }
    }

    fn solver(model: &Decay) -> SolverCore<'_, ExplicitRungeKutta> {
        SolverCore::new(model, ExplicitRungeKutta::new(), 1, 0)
    }

    #[test]
    fn setters_round_trip() {
        let model = Decay;
        let mut s = solver(&model);

        s.set_initial_time(2.5);
        s.set_initial_values(vec![1.0]);
        s.set_rel_tol(1e-6).unwrap();
        s.set_abs_tol(vec![1e-8]).unwrap();
        s.set_max_internal_steps(500);
        s.set_initial_step_size(1e-4);
        s.set_min_step_size(1e-12);
        s.set_max_step_size(10.0);
        s.set_delays_count(0);

        assert_eq!(s.initial_time(), 2.5);
        assert_eq!(s.initial_values(), &[1.0]);
        assert_eq!(s.rel_tol(), 1e-6);
        assert_eq!(s.abs_tol(), &[1e-8]);
        assert_eq!(s.max_internal_steps(), 500);
        assert_eq!(s.initial_step_size(), 1e-4);
        assert_eq!(s.min_step_size(), 1e-12);
        assert_eq!(s.max_step_size(), 10.0);
    }

    #[test]
    fn abs_tol_requires_problem_size() {
        let model = Decay;
        let mut s = SolverCore::new(&model, ExplicitRungeKutta::new(), 0, 0);

        let err = s.set_abs_tol(vec![1e-6]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failure);
        let err = s.set_abs_tol_scalar(1e-6).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failure);
        assert!(!s.last_report().is_ok());
    }

    #[test]
    fn abs_tol_length_and_sign_checks() {
        let model = Decay;
        let mut s = solver(&model);

        assert!(s.set_abs_tol(vec![1e-6, 1e-6]).is_err());
        assert!(s.set_abs_tol(vec![-1e-6]).is_err());
        assert!(s.set_abs_tol(vec![1e-6]).is_ok());
        assert!(s.last_report().is_ok());
    }

    #[test]
    fn scalar_abs_tol_fills_every_slot() {
        let model = Decay;
        let mut s = SolverCore::new(&model, ExplicitRungeKutta::new(), 3, 0);

        assert!(s.set_abs_tol_scalar(0.0).is_err());
        assert!(s.set_abs_tol_scalar(-1.0).is_err());
        s.set_abs_tol_scalar(1e-7).unwrap();
        assert_eq!(s.abs_tol(), &[1e-7, 1e-7, 1e-7]);
    }

    #[test]
    fn rel_tol_must_be_positive() {
        let model = Decay;
        let mut s = solver(&model);
        assert!(s.set_rel_tol(0.0).is_err());
        assert!(s.set_rel_tol(-1e-9).is_err());
        assert_eq!(s.rel_tol(), 1e-9);
        s.set_rel_tol(1e-5).unwrap();
        assert_eq!(s.rel_tol(), 1e-5);
    }

    #[test]
    fn problem_size_change_clears_dependent_arrays() {
        let model = Decay;
        let mut s = solver(&model);
        s.set_initial_values(vec![1.0]);
        s.set_abs_tol(vec![1e-6]).unwrap();

        // same size: nothing happens
        s.set_problem_size(1);
        assert_eq!(s.initial_values(), &[1.0]);

        s.set_problem_size(2);
        assert!(s.initial_values().is_empty());
        assert!(s.abs_tol().is_empty());
        assert!(!s.is_initialized());
    }

    #[test]
    fn sensitivity_count_change_clears_parameter_values() {
        let model = Decay;
        let mut s = solver(&model);
        s.set_sensitivity_parameter_count(2);
        s.set_sensitivity_parameter_values(vec![0.5, 0.5]);
        s.set_sensitivity_parameter_count(1);
        assert!(s.sensitivity_parameter_values().is_empty());
    }

    #[test]
    fn initialize_reports_first_violated_precondition() {
        let model = Decay;
        let mut s = SolverCore::new(&model, ExplicitRungeKutta::new(), 0, 0);

        let err = s.initialize().unwrap_err();
        assert!(err.message().contains("problem size"));

        s.set_problem_size(1);
        let err = s.initialize().unwrap_err();
        assert!(err.message().contains("absolute tolerances"));

        s.set_abs_tol(vec![1e-6]).unwrap();
        let err = s.initialize().unwrap_err();
        assert!(err.message().contains("initial value"));

        s.set_initial_values(vec![1.0]);
        s.initialize().unwrap();
        assert!(s.is_initialized());
        assert!(s.last_report().is_ok());
    }
}
