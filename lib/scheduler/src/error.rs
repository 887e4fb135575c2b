//! Error types for the scheduler crate.
//!
//! - `ScheduleError`: rejected schedule configuration or failed evaluation
//! - `FireError`: a fire handler reported failure (logged, never fatal to the timer)

use std::fmt;

/// Errors from schedule parsing and evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// A required config field is absent.
    MissingField { field: &'static str },
    /// A config field is present but malformed.
    InvalidField { field: &'static str, reason: String },
    /// The schedule mode is not one of the supported modes.
    UnknownMode { mode: String },
    /// Next-fire evaluation overflowed the supported date range.
    EvaluationFailed { reason: String },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { field } => write!(f, "missing schedule field '{field}'"),
            Self::InvalidField { field, reason } => {
                write!(f, "invalid schedule field '{field}': {reason}")
            }
            Self::UnknownMode { mode } => write!(f, "unknown schedule type '{mode}'"),
            Self::EvaluationFailed { reason } => {
                write!(f, "schedule evaluation failed: {reason}")
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

impl ScheduleError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// A fire handler failed. The timer logs it and keeps its re-arm cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireError {
    /// Why the handler failed.
    pub reason: String,
}

impl FireError {
    /// Creates a fire error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scheduled fire failed: {}", self.reason)
    }
}

impl std::error::Error for FireError {}
