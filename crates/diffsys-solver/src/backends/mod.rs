//! Concrete stepping backends.

pub mod explicit_rk;
pub mod implicit_euler;

// Internal helpers shared by the backends
pub(crate) mod history;
pub(crate) mod sensitivity;

pub use explicit_rk::ExplicitRungeKutta;
pub use implicit_euler::ImplicitEuler;
