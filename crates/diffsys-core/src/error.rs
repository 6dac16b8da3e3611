//! Error taxonomy shared by the solver core and all backends.

use thiserror::Error;

pub type SolverResult<T> = Result<T, SolverError>;

/// Classification of a solver failure.
///
/// The last four kinds are recoverable by retry from the host's
/// perspective (shrink the step, raise a tolerance, step again);
/// `Failure` and `IllegalInput` require host-side correction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// No error in flight.
    Ok,
    /// Programming or precondition violation.
    Failure,
    /// Illegal input passed to a backend.
    IllegalInput,
    /// Internal step budget exhausted before reaching the output time.
    StepLimitExceeded,
    /// Requested accuracy not achievable with the configured step bounds.
    AccuracyLimitExceeded,
    /// Repeated error-test failures inside the stepper.
    RepeatedTestFailure,
    /// Nonlinear (e.g. Newton) iteration failed to converge.
    ConvergenceFailure,
}

impl ErrorKind {
    /// True for kinds the host may retry after adjusting step/tolerance.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::StepLimitExceeded
                | ErrorKind::AccuracyLimitExceeded
                | ErrorKind::RepeatedTestFailure
                | ErrorKind::ConvergenceFailure
        )
    }
}

/// A classified solver failure with its originating operation.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{source_op}: {message}")]
pub struct SolverError {
    kind: ErrorKind,
    source_op: &'static str,
    message: String,
}

impl SolverError {
    pub fn new(kind: ErrorKind, source_op: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            source_op,
            message: message.into(),
        }
    }

    /// Generic precondition/programming failure.
    pub fn failure(source_op: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Failure, source_op, message)
    }

    pub fn illegal_input(source_op: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IllegalInput, source_op, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Name of the operation that raised the error.
    pub fn source_op(&self) -> &'static str {
        self.source_op
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }
}

/// Host-facing record of the last failure.
///
/// `kind == Ok` means no error is in flight; a freshly cleared report
/// always has `kind == Ok` and empty text fields.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub source: String,
    pub message: String,
}

impl ErrorReport {
    /// The cleared ("no error") report.
    pub fn ok() -> Self {
        Self {
            kind: ErrorKind::Ok,
            source: String::new(),
            message: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.kind == ErrorKind::Ok
    }

    /// Reset to the cleared state.
    pub fn clear(&mut self) {
        *self = Self::ok();
    }

    /// Replace the report from an operation result.
    pub fn from_result<T>(result: &SolverResult<T>) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(e) => Self::from(e.clone()),
        }
    }
}

impl Default for ErrorReport {
    fn default() -> Self {
        Self::ok()
    }
}

impl From<SolverError> for ErrorReport {
    fn from(e: SolverError) -> Self {
        Self {
            kind: e.kind,
            source: e.source_op.to_string(),
            message: e.message,
        }
    }
}
