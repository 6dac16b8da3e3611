//! diffsys-core: stable foundation for the diffsys solver contract.
//!
//! Contains:
//! - error (solver error taxonomy + host-facing error report)
//! - options (backend tunable descriptors + value validation)
//! - numeric (float helpers shared by configuration and backends)

pub mod error;
pub mod numeric;
pub mod options;

// Re-exports: nice ergonomics for downstream crates
pub use error::{ErrorKind, ErrorReport, SolverError, SolverResult};
pub use numeric::*;
pub use options::{find_option, OptionChoice, OptionDescriptor, OptionKind};
