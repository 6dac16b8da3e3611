//! SolverBackend: the trait every concrete stepping backend implements.

use diffsys_core::{ErrorKind, OptionDescriptor, SolverError, SolverResult};
use nalgebra::{DMatrix, DVector};

use crate::config::SolverConfig;
use crate::model::ModelCallback;

/// Outcome of one output-time request.
///
/// Recoverable and fatal outcomes both leave the solver initialized;
/// recoverable means the host may retry the same request (possibly after
/// adjusting step bounds or tolerances), fatal means the host must not
/// continue without intervention.
#[derive(Clone, Debug)]
pub enum StepStatus {
    /// The requested output time was reached.
    Complete,
    Recoverable(SolverError),
    Fatal(SolverError),
}

impl StepStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, StepStatus::Complete)
    }

    /// The carried error, if any.
    pub fn error(&self) -> Option<&SolverError> {
        match self {
            StepStatus::Complete => None,
            StepStatus::Recoverable(e) | StepStatus::Fatal(e) => Some(e),
        }
    }
}

/// Solution state returned by a step request.
///
/// `t_reached` equals the requested output time exactly when `status`
/// is [`StepStatus::Complete`]; otherwise it is the time the backend
/// actually reached. `y` is the state at `t_reached`. `sensitivities`
/// is `Some` with shape problem_size × sensitivity_parameter_count when
/// sensitivity analysis is enabled, with `[(i, j)] = dy_i/dp_j`.
#[derive(Clone, Debug)]
pub struct StepOutput {
    pub status: StepStatus,
    pub t_reached: f64,
    pub y: DVector<f64>,
    pub sensitivities: Option<DMatrix<f64>>,
}

/// Contract between the solver core and a concrete stepping backend.
///
/// The core performs the base validation; `initialize` only runs after
/// it has passed, and the core flips its initialized flag only when
/// `initialize` succeeds. Backends read the configuration and never
/// mutate it.
pub trait SolverBackend {
    /// Descriptors for the backend's non-standard tunables.
    fn options(&self) -> Vec<OptionDescriptor>;

    /// Set a tunable by name. Unknown names and out-of-range values fail
    /// with an illegal-input error at configuration time.
    fn set_option(&mut self, name: &str, value: f64) -> SolverResult<()>;

    /// Backend-specific allocation and consistency checks (e.g. rejecting
    /// inconsistent step bounds or unsupported capabilities).
    fn initialize(&mut self, model: &dyn ModelCallback, config: &SolverConfig)
        -> SolverResult<()>;

    /// Advance the solution toward `t_out`.
    fn step(
        &mut self,
        model: &dyn ModelCallback,
        config: &SolverConfig,
        t_out: f64,
    ) -> SolverResult<StepOutput>;

    /// Restart integration from the configured initial time and values,
    /// discarding internal history (used after discontinuities).
    fn reinitialize(
        &mut self,
        model: &dyn ModelCallback,
        config: &SolverConfig,
    ) -> SolverResult<()>;

    /// Release backend-internal resources. Idempotent.
    fn terminate(&mut self);

    /// Human-readable message for a backend-specific return code.
    fn describe_return_code(&self, code: i32) -> String;

    /// Error classification for a backend-specific return code.
    fn kind_from_return_code(&self, code: i32) -> ErrorKind;
}
