//! Explicit adaptive Runge-Kutta backend (embedded Cash-Karp 4(5)).

use diffsys_core::{ErrorKind, OptionDescriptor, SolverError, SolverResult};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::backend::{SolverBackend, StepOutput, StepStatus};
use crate::backends::history::History;
use crate::backends::sensitivity::advance_sensitivities;
use crate::config::SolverConfig;
use crate::model::{EvalOutcome, ModelCallback};

// Cash-Karp tableau
const C: [f64; 6] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 3.0 / 5.0, 1.0, 7.0 / 8.0];
const A: [[f64; 5]; 5] = [
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0],
    [3.0 / 10.0, -9.0 / 10.0, 6.0 / 5.0, 0.0, 0.0],
    [-11.0 / 54.0, 5.0 / 2.0, -70.0 / 27.0, 35.0 / 27.0, 0.0],
    [
        1631.0 / 55296.0,
        175.0 / 512.0,
        575.0 / 13824.0,
        44275.0 / 110592.0,
        253.0 / 4096.0,
    ],
];
const B5: [f64; 6] = [
    37.0 / 378.0,
    0.0,
    250.0 / 621.0,
    125.0 / 594.0,
    0.0,
    512.0 / 1771.0,
];
const B4: [f64; 6] = [
    2825.0 / 27648.0,
    0.0,
    18575.0 / 48384.0,
    13525.0 / 55296.0,
    277.0 / 14336.0,
    1.0 / 4.0,
];

/// Backend return codes, translated through the trait's code pair.
pub const RET_OK: i32 = 0;
pub const RET_STEP_LIMIT: i32 = 1;
pub const RET_ACCURACY_LIMIT: i32 = 2;
pub const RET_TEST_FAILURE: i32 = 3;
pub const RET_ILLEGAL_INPUT: i32 = -1;
pub const RET_RHS_FAILURE: i32 = -2;

enum RhsFailure {
    Recoverable,
    Fatal,
}

/// Non-stiff explicit backend with error-controlled step adaptation.
///
/// Supports ODE and DDE systems plus per-parameter sensitivity
/// propagation. Recoverable RHS outcomes trigger a cutback retry of the
/// offending internal step.
pub struct ExplicitRungeKutta {
    t: f64,
    y: DVector<f64>,
    params: DVector<f64>,
    sens: Option<DMatrix<f64>>,
    history: Option<History>,
    h: f64,
    safety_factor: f64,
    max_step_retries: usize,
    accepted_last_call: usize,
}

impl ExplicitRungeKutta {
    pub fn new() -> Self {
        Self {
            t: 0.0,
            y: DVector::zeros(0),
            params: DVector::zeros(0),
            sens: None,
            history: None,
            h: 0.0,
            safety_factor: 0.9,
            max_step_retries: 20,
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
        self.history = if model.has_delay_equations() {
            Some(History::new(self.t, self.y.clone()))
        } else {
            None
        };
        self.h = initial_step(config);
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

    fn eval_rhs(
        &self,
        model: &dyn ModelCallback,
        config: &SolverConfig,
        t: f64,
        y: &DVector<f64>,
    ) -> Result<DVector<f64>, RhsFailure> {
        let mut ydot = DVector::zeros(y.len());
        let outcome = match &self.history {
            Some(history) => {
                let mut delay_values = DVector::zeros(config.delays_count);
                model.delays(t, y, &mut delay_values);
                let delayed = history.delayed_matrix(t, &delay_values);
                model.dde_rhs(t, y, &delayed, &mut ydot)
            }
            None => model.ode_rhs(t, y, &self.params, &mut ydot),
        };
        match outcome {
            EvalOutcome::Ok => Ok(ydot),
            EvalOutcome::Recoverable => Err(RhsFailure::Recoverable),
            EvalOutcome::Fatal => Err(RhsFailure::Fatal),
        }
    }

    /// One embedded trial step from (t, y) with step size h.
    /// Returns the 5th-order solution and the scaled error ratio.
    fn trial_step(
        &self,
        model: &dyn ModelCallback,
        config: &SolverConfig,
        h: f64,
    ) -> Result<(DVector<f64>, f64), RhsFailure> {
        let mut k: Vec<DVector<f64>> = Vec::with_capacity(6);
        k.push(self.eval_rhs(model, config, self.t, &self.y)?);

        for stage in 1..6 {
            let mut y_stage = self.y.clone();
            for (j, kj) in k.iter().enumerate() {
                let a = A[stage - 1][j];
                if a != 0.0 {
                    y_stage += kj * (a * h);
                }
            }
            k.push(self.eval_rhs(model, config, self.t + C[stage] * h, &y_stage)?);
        }

        let mut y5 = self.y.clone();
        let mut y4 = self.y.clone();
        for (j, kj) in k.iter().enumerate() {
            if B5[j] != 0.0 {
                y5 += kj * (B5[j] * h);
            }
            if B4[j] != 0.0 {
                y4 += kj * (B4[j] * h);
            }
        }

        let mut ratio: f64 = 0.0;
        for i in 0..self.y.len() {
            let scale = config.abs_tol[i] + config.rel_tol * self.y[i].abs().max(y5[i].abs());
            ratio = ratio.max((y5[i] - y4[i]).abs() / scale);
        }

        Ok((y5, ratio))
    }
}

impl Default for ExplicitRungeKutta {
    fn default() -> Self {
        Self::new()
    }
}

fn initial_step(config: &SolverConfig) -> f64 {
    let floor = config.min_step_size.max(f64::EPSILON);
    config.initial_step_size.max(floor).min(config.max_step_size)
}

fn step_floor(config: &SolverConfig, t: f64) -> f64 {
    config
        .min_step_size
        .max(t.abs().max(1.0) * f64::EPSILON * 16.0)
}

impl SolverBackend for ExplicitRungeKutta {
    fn options(&self) -> Vec<OptionDescriptor> {
        vec![
            OptionDescriptor::real(
                "safety_factor",
                "Safety factor applied to the error-controlled step size update",
                0.9,
                0.1,
                1.0,
            ),
            OptionDescriptor::integer(
                "max_step_retries",
                "Cutback retries of one internal step after a recoverable RHS error",
                20,
                1,
                100,
            ),
        ]
    }

    fn set_option(&mut self, name: &str, value: f64) -> SolverResult<()> {
        let catalog = self.options();
        let descriptor = diffsys_core::find_option(&catalog, name)?;
        descriptor.validate_value(value)?;
        match name {
            "safety_factor" => self.safety_factor = value,
            "max_step_retries" => self.max_step_retries = value as usize,
            _ => unreachable!("descriptor lookup covers the catalog"),
        }
        Ok(())
    }

    fn initialize(
        &mut self,
        model: &dyn ModelCallback,
        config: &SolverConfig,
    ) -> SolverResult<()> {
        const SOURCE: &str = "explicit_rk::initialize";

        if !model.has_ode_rhs() && !model.has_delay_equations() {
            return Err(SolverError::illegal_input(
                SOURCE,
                "model provides neither an ODE nor a DDE right-hand side",
            ));
        }
        if model.has_delay_equations() && config.delays_count == 0 {
            return Err(SolverError::illegal_input(
                SOURCE,
                "model advertises delay equations but the delay count is 0",
            ));
        }
        if config.delays_count > 0 && !model.has_delay_equations() {
            return Err(SolverError::illegal_input(
                SOURCE,
                "delay count is set but the model does not support delay equations",
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
        debug!(
            problem_size = config.problem_size,
            delays = config.delays_count,
            sensitivity_parameters = config.sensitivity_parameter_count,
            "explicit RK backend initialized"
        );
        Ok(())
    }

    fn step(
        &mut self,
        model: &dyn ModelCallback,
        config: &SolverConfig,
        t_out: f64,
    ) -> SolverResult<StepOutput> {
        const SOURCE: &str = "explicit_rk::step";

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
                warn!(
                    t_reached = self.t,
                    t_out, "internal step limit exhausted"
                );
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

            let floor = step_floor(config, self.t);
            self.h = self.h.min(config.max_step_size).max(floor);
            let clipped = self.h >= t_out - self.t;
            let h_try = if clipped { t_out - self.t } else { self.h };

            // Trial with cutback retries on recoverable RHS outcomes.
            let mut h_cur = h_try;
            let mut retries = 0;
            let (y_new, err_ratio) = loop {
                match self.trial_step(model, config, h_cur) {
                    Ok(result) => break result,
                    Err(RhsFailure::Fatal) => {
                        return Ok(self.output(StepStatus::Fatal(SolverError::failure(
                            SOURCE,
                            "right-hand side evaluation failed",
                        ))));
                    }
                    Err(RhsFailure::Recoverable) => {
                        retries += 1;
                        h_cur *= 0.5;
                        if retries > self.max_step_retries || h_cur < floor {
                            return Ok(self.output(StepStatus::Recoverable(SolverError::new(
                                ErrorKind::RepeatedTestFailure,
                                SOURCE,
                                format!(
                                    "right-hand side kept failing recoverably at t = {}",
                                    self.t
                                ),
                            ))));
                        }
                    }
                }
            };

            if err_ratio <= 1.0 {
                // Accept
                let h_used = h_cur;
                let reached_t_out = clipped && h_cur == h_try;
                self.t = if reached_t_out { t_out } else { self.t + h_used };
                self.y = y_new;
                self.accepted_last_call += 1;

                if let Some(history) = &mut self.history {
                    history.push(self.t, self.y.clone());
                }

                if self.sens.is_some() {
                    let ydot = match self.eval_rhs(model, config, self.t, &self.y) {
                        Ok(v) => v,
                        Err(RhsFailure::Fatal) => {
                            return Ok(self.output(StepStatus::Fatal(SolverError::failure(
                                SOURCE,
                                "right-hand side evaluation failed",
                            ))));
                        }
                        Err(RhsFailure::Recoverable) => {
                            return Ok(self.output(StepStatus::Recoverable(SolverError::new(
                                ErrorKind::RepeatedTestFailure,
                                SOURCE,
                                "right-hand side failed recoverably during sensitivity update",
                            ))));
                        }
                    };
                    let sens = self.sens.as_mut().unwrap();
                    if let Err(e) = advance_sensitivities(model, self.t, &self.y, &ydot, h_used, sens)
                    {
                        let status = if e.is_recoverable() {
                            StepStatus::Recoverable(e)
                        } else {
                            StepStatus::Fatal(e)
                        };
                        return Ok(self.output(status));
                    }
                }

                // Grow for the next step
                let grow = if err_ratio > 0.0 {
                    (self.safety_factor * err_ratio.powf(-0.2)).min(5.0)
                } else {
                    5.0
                };
                self.h = (h_used * grow.max(1.0)).min(config.max_step_size);
            } else {
                // Reject: shrink and retry
                let shrink = (self.safety_factor * err_ratio.powf(-0.25)).max(0.1);
                let h_next = h_cur * shrink;
                if h_next < floor {
                    return Ok(self.output(StepStatus::Recoverable(SolverError::new(
                        ErrorKind::AccuracyLimitExceeded,
                        SOURCE,
                        format!(
                            "requested accuracy needs a step below the minimal step size at t = {}",
                            self.t
                        ),
                    ))));
                }
                self.h = h_next;
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
        debug!(t0 = config.initial_time, "explicit RK backend reinitialized");
        Ok(())
    }

    fn terminate(&mut self) {
        self.y = DVector::zeros(0);
        self.params = DVector::zeros(0);
        self.sens = None;
        self.history = None;
        self.accepted_last_call = 0;
    }

    fn describe_return_code(&self, code: i32) -> String {
        match code {
            RET_OK => "success".to_string(),
            RET_STEP_LIMIT => "maximum number of internal steps reached".to_string(),
            RET_ACCURACY_LIMIT => "requested accuracy not achievable".to_string(),
            RET_TEST_FAILURE => "repeated recoverable right-hand side failures".to_string(),
            RET_ILLEGAL_INPUT => "illegal input".to_string(),
            RET_RHS_FAILURE => "right-hand side evaluation failed".to_string(),
            other => format!("unknown return code {other}"),
        }
    }

    fn kind_from_return_code(&self, code: i32) -> ErrorKind {
        match code {
            RET_OK => ErrorKind::Ok,
            RET_STEP_LIMIT => ErrorKind::StepLimitExceeded,
            RET_ACCURACY_LIMIT => ErrorKind::AccuracyLimitExceeded,
            RET_TEST_FAILURE => ErrorKind::RepeatedTestFailure,
            RET_ILLEGAL_INPUT => ErrorKind::IllegalInput,
            _ => ErrorKind::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn config_1d() -> SolverConfig {
        SolverConfig {
            problem_size: 1,
            initial_values: vec![1.0],
            abs_tol: vec![1e-9],
            rel_tol: 1e-9,
            initial_step_size: 1e-4,
            ..SolverConfig::default()
        }
    }

    #[test]
    fn reaches_requested_time_exactly() {
        let model = Decay;
        let config = config_1d();
        let mut backend = ExplicitRungeKutta::new();
        backend.initialize(&model, &config).unwrap();

        let out = backend.step(&model, &config, 0.5).unwrap();
        assert!(out.status.is_complete());
        assert_eq!(out.t_reached, 0.5);
        assert!((out.y[0] - (-0.5f64).exp()).abs() < 1e-7);
        assert!(backend.last_accepted_steps() > 0);
    }

    #[test]
    fn step_limit_is_recoverable_and_resumable() {
        let model = Decay;
        let mut config = config_1d();
        config.max_internal_steps = 3;

        let mut backend = ExplicitRungeKutta::new();
        backend.initialize(&model, &config).unwrap();

        let out = backend.step(&model, &config, 10.0).unwrap();
        match &out.status {
            StepStatus::Recoverable(e) => {
                assert_eq!(e.kind(), ErrorKind::StepLimitExceeded);
            }
            other => panic!("expected recoverable step limit, got {other:?}"),
        }
        assert!(out.t_reached < 10.0);

        // The solver stays usable; the same request can be reissued.
        config.max_internal_steps = 100_000;
        let out = backend.step(&model, &config, 10.0).unwrap();
        assert!(out.status.is_complete());
        assert_eq!(out.t_reached, 10.0);
    }

    #[test]
    fn backwards_output_time_is_fatal_illegal_input() {
        let model = Decay;
        let config = config_1d();
        let mut backend = ExplicitRungeKutta::new();
        backend.initialize(&model, &config).unwrap();
        backend.step(&model, &config, 1.0).unwrap();

        let out = backend.step(&model, &config, 0.5).unwrap();
        match &out.status {
            StepStatus::Fatal(e) => assert_eq!(e.kind(), ErrorKind::IllegalInput),
            other => panic!("expected fatal illegal input, got {other:?}"),
        }
    }

    #[test]
    fn return_code_translation() {
        let backend = ExplicitRungeKutta::new();
        assert_eq!(backend.kind_from_return_code(RET_OK), ErrorKind::Ok);
        assert_eq!(
            backend.kind_from_return_code(RET_STEP_LIMIT),
            ErrorKind::StepLimitExceeded
        );
        assert_eq!(
            backend.kind_from_return_code(RET_ILLEGAL_INPUT),
            ErrorKind::IllegalInput
        );
        assert!(backend.describe_return_code(RET_ACCURACY_LIMIT).contains("accuracy"));
    }
}
