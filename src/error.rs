//! Error and diagnostic types for the simulation core
//!
//! Fatal errors abort a simulation before any projection is produced.
//! Advisory conditions (an unmatched account name, an over-allocated
//! percentage config) never abort: they are collected as [`Diagnostic`]
//! records on the run output and logged as warnings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal simulation errors. A simulation that returns one of these has
/// produced no projection at all.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid input: {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("payment {payment:.2} cannot amortize principal {principal:.2} at the given rate")]
    PaymentTooSmall { principal: f64, payment: f64 },
}

impl SimError {
    /// Shorthand for an `InvalidInput` error
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        SimError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Category of an advisory diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// A modifier referenced an account name or asset class with no match;
    /// the simulation proceeded without the effect
    AccountNotFound,

    /// An account-name pattern matched more than one account; the first
    /// match was used
    AmbiguousAccountMatch,

    /// Configured allocation percentages summed above 100 and were scaled
    /// down proportionally
    AllocationOverflow,

    /// A pension withdrawal was requested before the minimum access age and
    /// was ignored
    PensionAgeRestricted,

    /// ISA deposits exceeded the remaining annual allowance and the excess
    /// was redirected
    IsaOverflow,
}

/// An advisory record attached to a projection run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,

    /// Period index the condition was observed at, if period-specific
    pub period: Option<u32>,

    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, period: Option<u32>, message: impl Into<String>) -> Self {
        Self {
            kind,
            period,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimError::invalid("years", "must be positive");
        assert_eq!(err.to_string(), "invalid input: years: must be positive");

        let err = SimError::PaymentTooSmall {
            principal: 10_000.0,
            payment: 50.0,
        };
        assert!(err.to_string().contains("50.00"));
        assert!(err.to_string().contains("10000.00"));
    }
}
