//! diffsys-solver: lifecycle and callback contract between a model and
//! interchangeable ODE/DDE integration backends.
//!
//! Provides:
//! - ModelCallback: the capability-negotiated interface a model exposes
//! - SolverCore: configuration + lifecycle state machine
//! - SolverBackend: the trait every concrete stepping backend implements
//! - Two reference backends (explicit adaptive RK, implicit Euler)
//! - Newton / finite-difference Jacobian helpers for implicit backends

pub mod backend;
pub mod backends;
pub mod config;
pub mod jacobian;
pub mod model;
pub mod newton;
pub mod solver;

// Re-exports for public API
pub use backend::{SolverBackend, StepOutput, StepStatus};
pub use backends::{ExplicitRungeKutta, ImplicitEuler};
pub use config::SolverConfig;
pub use diffsys_core::{
    ErrorKind, ErrorReport, OptionChoice, OptionDescriptor, OptionKind, SolverError, SolverResult,
};
pub use model::{EvalOutcome, ModelCallback};
pub use newton::{NewtonConfig, NewtonResult};
pub use solver::SolverCore;
