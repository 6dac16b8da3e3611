//! Stiff implicit backend: backward Euler with Newton iteration.

use diffsys_core::{ErrorKind, OptionDescriptor, SolverError, SolverResult};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::backend::{SolverBackend, StepOutput, StepStatus};
use crate::backends::sensitivity::advance_sensitivities;
use crate::config::SolverConfig;
use crate::jacobian::finite_difference_jacobian;
use crate::model::{EvalOutcome, ModelCallback};
use crate::newton::{newton_solve, NewtonConfig};

/// Backend return codes, translated through the trait's code pair.
pub const RET_OK: i32 = 0;
pub const RET_STEP_LIMIT: i32 = 1;
pub const RET_CONV_FAILURE: i32 = 4;
pub const RET_ILLEGAL_INPUT: i32 = -1;
pub const RET_RHS_FAILURE: i32 = -2;

const FD_EPSILON: f64 = 1e-7;

/// Jacobian evaluation strategy for the Newton iteration matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JacobianStrategy {
    /// Use the model's analytic Jacobian when it advertises one.
    AnalyticPreferred,
    /// Always approximate by finite differences.
    FiniteDifference,
}

/// Stiff implicit backend.
///
/// Fixed-step backward Euler where each step solves
/// `u - y_n - h f(t_{n+1}, u) = 0` with a damped Newton iteration.
/// Supports ODE systems and sensitivity propagation; DDE systems are
/// rejected at initialization.
pub struct ImplicitEuler {
    t: f64,
    y: DVector<f64>,
    params: DVector<f64>,
    sens: Option<DMatrix<f64>>,
    base_step: f64,
    max_newton_iterations: usize,
    newton_tolerance: f64,
    jacobian_strategy: JacobianStrategy,
    max_step_retries: usize,
    accepted_last_call: usize,
}

impl ImplicitEuler {
    pub fn new() -> Self {
        Self {
            t: 0.0,
            y: DVector::zeros(0),
            params: DVector::zeros(0),
            sens: None,
            base_step: 0.0,
            max_newton_iterations: 7,
            newton_tolerance: 1e-12,
            jacobian_strategy: JacobianStrategy::AnalyticPreferred,
            max_step_retries: 10,
            accepted_last_call: 0,
        }
    }

    /// Accepted internal steps taken by the most recent `step` call.
    pub fn last_accepted_steps(&self) -> usize {
        self.accepted_last_call
    }

    fn load_state(&mut self, config: &SolverConfig, model: &dyn ModelCallback) {
        self.t = config.initial_time;
        self.y = DVector::from_vec(config.initial_values.clone());
        self.params = DVector::from_vec(config.sensitivity_parameter_values.clone());
        self.sens = if model.has_sensitivity() && config.sensitivity_parameter_count > 0 {
            Some(DMatrix::zeros(
                config.problem_size,
                config.sensitivity_parameter_count,
            ))
        } else {
            None
        };
        self.base_step = config
            .initial_step_size
            .max(config.min_step_size)
            .max(f64::EPSILON)
            .min(config.max_step_size);
        self.accepted_last_call = 0;
    }

    fn output(&self, status: StepStatus) -> StepOutput {
        StepOutput {
            status,
            t_reached: self.t,
            y: self.y.clone(),
            sensitivities: self.sens.clone(),
        }
    }

    fn rhs(
        &self,
        model: &dyn ModelCallback,
        t: f64,
        y: &DVector<f64>,
    ) -> SolverResult<DVector<f64>> {
        const SOURCE: &str = "implicit_euler::rhs";
        let mut ydot = DVector::zeros(y.len());
        match model.ode_rhs(t, y, &self.params, &mut ydot) {
            EvalOutcome::Ok => Ok(ydot),
            EvalOutcome::Recoverable => Err(SolverError::new(
                ErrorKind::RepeatedTestFailure,
                SOURCE,
                "right-hand side reported a recoverable error",
            )),
            EvalOutcome::Fatal => Err(SolverError::failure(
                SOURCE,
                "right-hand side evaluation failed",
            )),
        }
    }

    /// Solve the backward Euler stage equation for one step of size h.
    fn solve_stage(
        &self,
        model: &dyn ModelCallback,
        h: f64,
    ) -> SolverResult<DVector<f64>> {
        let t_next = self.t + h;
        let y_n = self.y.clone();
        let n = y_n.len();

        let residual = |u: &DVector<f64>| -> SolverResult<DVector<f64>> {
            let f = self.rhs(model, t_next, u)?;
            Ok(u - &y_n - f * h)
        };

        let use_analytic =
            self.jacobian_strategy == JacobianStrategy::AnalyticPreferred && model.has_jacobian();

        let jacobian = |u: &DVector<f64>| -> SolverResult<DMatrix<f64>> {
            if use_analytic {
                let fy = self.rhs(model, t_next, u)?;
                let mut jf = DMatrix::zeros(n, n);
                match model.ode_jacobian(t_next, u, &self.params, &fy, &mut jf) {
                    EvalOutcome::Ok => {}
                    EvalOutcome::Recoverable => {
                        return Err(SolverError::new(
                            ErrorKind::RepeatedTestFailure,
                            "implicit_euler::jacobian",
                            "Jacobian evaluation reported a recoverable error",
                        ));
                    }
                    EvalOutcome::Fatal => {
                        return Err(SolverError::failure(
                            "implicit_euler::jacobian",
                            "Jacobian evaluation failed",
                        ));
                    }
                }
                // Iteration matrix I - h J
                Ok(DMatrix::identity(n, n) - jf * h)
            } else {
                finite_difference_jacobian(u, &residual, FD_EPSILON)
            }
        };

        let newton_config = NewtonConfig {
            max_iterations: self.max_newton_iterations,
            abs_tol: self.newton_tolerance,
            ..NewtonConfig::default()
        };

        // Predictor: explicit Euler from the last state.
        let predictor = match self.rhs(model, self.t, &y_n) {
            Ok(f) => &y_n + f * h,
            Err(_) => y_n.clone(),
        };

        let result = newton_solve(predictor, &residual, jacobian, &newton_config)?;
        Ok(result.x)
    }
}

impl Default for ImplicitEuler {
    fn default() -> Self {
        Self::new()
    }
}

impl SolverBackend for ImplicitEuler {
    fn options(&self) -> Vec<OptionDescriptor> {
        vec![
            OptionDescriptor::integer(
                "max_newton_iterations",
                "Newton iterations allowed per implicit stage",
                7,
                1,
                50,
            ),
            OptionDescriptor::real(
                "newton_tolerance",
                "Absolute residual tolerance of the Newton iteration",
                1e-12,
                1e-15,
                1e-3,
            ),
            OptionDescriptor::enumerated(
                "jacobian_strategy",
                "How the Newton iteration matrix is evaluated",
                0.0,
                vec![
                    diffsys_core::OptionChoice::new(0.0, "analytic when available"),
                    diffsys_core::OptionChoice::new(1.0, "finite difference"),
                ],
            ),
        ]
    }

    fn set_option(&mut self, name: &str, value: f64) -> SolverResult<()> {
        let catalog = self.options();
        let descriptor = diffsys_core::find_option(&catalog, name)?;
        descriptor.validate_value(value)?;
        match name {
            "max_newton_iterations" => self.max_newton_iterations = value as usize,
            "newton_tolerance" => self.newton_tolerance = value,
            "jacobian_strategy" => {
                self.jacobian_strategy = if value == 0.0 {
                    JacobianStrategy::AnalyticPreferred
                } else {
                    JacobianStrategy::FiniteDifference
                };
            }
            _ => unreachable!("descriptor lookup covers the catalog"),
        }
        Ok(())
    }

    fn initialize(
        &mut self,
        model: &dyn ModelCallback,
        config: &SolverConfig,
    ) -> SolverResult<()> {
        const SOURCE: &str = "implicit_euler::initialize";

        if model.has_delay_equations() || config.delays_count > 0 {
            return Err(SolverError::illegal_input(
                SOURCE,
                "delay equations are not supported by the implicit Euler backend",
            ));
        }
        if !model.has_ode_rhs() {
            return Err(SolverError::illegal_input(
                SOURCE,
                "model provides no ODE right-hand side",
            ));
        }
        if config.sensitivity_parameter_count > 0 && !model.has_sensitivity() {
            return Err(SolverError::illegal_input(
                SOURCE,
                "sensitivity parameters are configured but the model does not support sensitivity",
            ));
        }
        if config.min_step_size > config.max_step_size {
            return Err(SolverError::illegal_input(
                SOURCE,
                "minimal step size exceeds maximal step size",
            ));
        }
        if config.max_step_size <= 0.0 {
            return Err(SolverError::illegal_input(
                SOURCE,
                "maximal step size must be > 0",
            ));
        }

        self.load_state(config, model);
        if model.use_banded_linear_solver() {
            // Linear solver internals stay dense here; the band hint is advisory.
            debug!(
                lower = model.lower_half_bandwidth(),
                upper = model.upper_half_bandwidth(),
                "banded linear solver requested; factoring dense"
            );
        }
        debug!(
            problem_size = config.problem_size,
            step = self.base_step,
            "implicit Euler backend initialized"
        );
        Ok(())
    }

    fn step(
        &mut self,
        model: &dyn ModelCallback,
        config: &SolverConfig,
        t_out: f64,
    ) -> SolverResult<StepOutput> {
        const SOURCE: &str = "implicit_euler::step";

        self.accepted_last_call = 0;

        if t_out < self.t {
            return Ok(self.output(StepStatus::Fatal(SolverError::illegal_input(
                SOURCE,
                format!("requested output time {t_out} lies before current time {}", self.t),
            ))));
        }

        let mut attempts: usize = 0;

        while self.t < t_out {
            if attempts >= config.max_internal_steps {
                warn!(t_reached = self.t, t_out, "internal step limit exhausted");
                return Ok(self.output(StepStatus::Recoverable(SolverError::new(
                    ErrorKind::StepLimitExceeded,
                    SOURCE,
                    format!(
                        "maximum number of internal steps ({}) reached at t = {}",
                        config.max_internal_steps, self.t
                    ),
                ))));
            }
            attempts += 1;

            let remaining = t_out - self.t;
            let clipped = self.base_step >= remaining;
            let h_full = if clipped { remaining } else { self.base_step };

            // Newton failures trigger a cutback retry of the step.
            let mut h = h_full;
            let mut retries = 0;
            let y_new = loop {
                match self.solve_stage(model, h) {
                    Ok(u) => break u,
                    Err(e) if e.is_recoverable() => {
                        retries += 1;
                        h *= 0.5;
                        if retries > self.max_step_retries
                            || h < config.min_step_size.max(f64::EPSILON)
                        {
                            return Ok(self.output(StepStatus::Recoverable(SolverError::new(
                                ErrorKind::ConvergenceFailure,
                                SOURCE,
                                format!("Newton iteration kept failing at t = {}", self.t),
                            ))));
                        }
                    }
                    Err(e) => {
                        return Ok(self.output(StepStatus::Fatal(e)));
                    }
                }
            };

            let reached_t_out = clipped && h == h_full;
            self.t = if reached_t_out { t_out } else { self.t + h };
            self.y = y_new;
            self.accepted_last_call += 1;

            if self.sens.is_some() {
                let ydot = match self.rhs(model, self.t, &self.y) {
                    Ok(v) => v,
                    Err(e) => {
                        let status = if e.is_recoverable() {
                            StepStatus::Recoverable(e)
                        } else {
                            StepStatus::Fatal(e)
                        };
                        return Ok(self.output(status));
                    }
                };
                let sens = self.sens.as_mut().unwrap();
                if let Err(e) = advance_sensitivities(model, self.t, &self.y, &ydot, h, sens) {
                    let status = if e.is_recoverable() {
                        StepStatus::Recoverable(e)
                    } else {
                        StepStatus::Fatal(e)
                    };
                    return Ok(self.output(status));
                }
            }
        }

        Ok(self.output(StepStatus::Complete))
    }

    fn reinitialize(
        &mut self,
        model: &dyn ModelCallback,
        config: &SolverConfig,
    ) -> SolverResult<()> {
        self.load_state(config, model);
        debug!(t0 = config.initial_time, "implicit Euler backend reinitialized");
        Ok(())
    }

    fn terminate(&mut self) {
        self.y = DVector::zeros(0);
        self.params = DVector::zeros(0);
        self.sens = None;
        self.accepted_last_call = 0;
    }

    fn describe_return_code(&self, code: i32) -> String {
        match code {
            RET_OK => "success".to_string(),
            RET_STEP_LIMIT => "maximum number of internal steps reached".to_string(),
            RET_CONV_FAILURE => "Newton iteration failed to converge".to_string(),
            RET_ILLEGAL_INPUT => "illegal input".to_string(),
            RET_RHS_FAILURE => "right-hand side evaluation failed".to_string(),
            other => format!("unknown return code {other}"),
        }
    }

    fn kind_from_return_code(&self, code: i32) -> ErrorKind {
        match code {
            RET_OK => ErrorKind::Ok,
            RET_STEP_LIMIT => ErrorKind::StepLimitExceeded,
            RET_CONV_FAILURE => ErrorKind::ConvergenceFailure,
            RET_ILLEGAL_INPUT => ErrorKind::IllegalInput,
            _ => ErrorKind::Failure,
        }
    }
}
