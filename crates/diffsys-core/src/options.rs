//! Backend option catalog: descriptors for non-standard solver tunables.
//!
//! Each backend publishes a list of [`OptionDescriptor`] describing its
//! tunable surface (e.g. max Newton iterations, Jacobian strategy). The
//! host reads the list to build a UI or validation layer and mutates a
//! backend only through its named `set_option` entry point; unknown names
//! and out-of-range values are configuration-time errors, never a panic.

use crate::error::{ErrorKind, SolverError, SolverResult};
use crate::numeric::UNBOUNDED;

/// Data kind of a backend option value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OptionKind {
    /// Real-valued, constrained to [min_value, max_value].
    Real,
    /// Integer-valued (real-encoded), constrained to [min_value, max_value].
    Integer,
    /// One of an enumerated set of values.
    Enumerated,
}

/// A single admissible value of an enumerated option.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptionChoice {
    /// Real-encoded value.
    pub value: f64,
    /// Description shown to a user.
    pub label: String,
}

impl OptionChoice {
    pub fn new(value: f64, label: impl Into<String>) -> Self {
        Self {
            value,
            label: label.into(),
        }
    }
}

/// Describes one backend-specific tunable.
///
/// Defaults are real-encoded even for integer and enumerated kinds, so a
/// single `set_option(name, f64)` entry point covers the whole surface.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptionDescriptor {
    pub name: String,
    pub description: String,
    pub kind: OptionKind,
    pub default_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    /// Non-empty exactly when `kind == Enumerated`.
    pub choices: Vec<OptionChoice>,
}

impl OptionDescriptor {
    /// Real-valued option with an inclusive range.
    pub fn real(
        name: impl Into<String>,
        description: impl Into<String>,
        default_value: f64,
        min_value: f64,
        max_value: f64,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: OptionKind::Real,
            default_value,
            min_value,
            max_value,
            choices: Vec::new(),
        }
    }

    /// Real-valued option without range constraints.
    pub fn real_unbounded(
        name: impl Into<String>,
        description: impl Into<String>,
        default_value: f64,
    ) -> Self {
        Self::real(name, description, default_value, -UNBOUNDED, UNBOUNDED)
    }

    /// Integer-valued option with an inclusive range.
    pub fn integer(
        name: impl Into<String>,
        description: impl Into<String>,
        default_value: i64,
        min_value: i64,
        max_value: i64,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: OptionKind::Integer,
            default_value: default_value as f64,
            min_value: min_value as f64,
            max_value: max_value as f64,
            choices: Vec::new(),
        }
    }

    /// Enumerated option. The default must be one of the choice values;
    /// a mismatched default is reported when the first value is validated.
    pub fn enumerated(
        name: impl Into<String>,
        description: impl Into<String>,
        default_value: f64,
        choices: Vec<OptionChoice>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: OptionKind::Enumerated,
            default_value,
            min_value: -UNBOUNDED,
            max_value: UNBOUNDED,
            choices,
        }
    }

    /// Check a candidate value against this descriptor.
    ///
    /// Range for real/integer kinds, integrality for the integer kind,
    /// choice membership for the enumerated kind.
    pub fn validate_value(&self, value: f64) -> SolverResult<()> {
        if !value.is_finite() {
            return Err(self.value_error(value, "value must be finite"));
        }
        match self.kind {
            OptionKind::Real => self.validate_range(value),
            OptionKind::Integer => {
                if value.fract() != 0.0 {
                    return Err(self.value_error(value, "value must be an integer"));
                }
                self.validate_range(value)
            }
            OptionKind::Enumerated => {
                if self.choices.iter().any(|c| c.value == value) {
                    Ok(())
                } else {
                    Err(self.value_error(value, "value is not one of the admissible choices"))
                }
            }
        }
    }

    fn validate_range(&self, value: f64) -> SolverResult<()> {
        if value < self.min_value || value > self.max_value {
            return Err(self.value_error(
                value,
                format!("value out of range [{}, {}]", self.min_value, self.max_value),
            ));
        }
        Ok(())
    }

    fn value_error(&self, value: f64, detail: impl AsRef<str>) -> SolverError {
        SolverError::new(
            ErrorKind::IllegalInput,
            "set_option",
            format!("option '{}' = {value}: {}", self.name, detail.as_ref()),
        )
    }
}

/// Look up a descriptor by name; unknown names are an illegal-input error.
pub fn find_option<'a>(
    catalog: &'a [OptionDescriptor],
    name: &str,
) -> SolverResult<&'a OptionDescriptor> {
    catalog.iter().find(|d| d.name == name).ok_or_else(|| {
        SolverError::illegal_input("set_option", format!("unknown option '{name}'"))
    })
}
