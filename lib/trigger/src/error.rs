//! Error types for the trigger crate.
//!
//! - `TriggerFailure`: the structured error every public trigger operation returns
//! - `RegistryError`: the listener store rejected a write
//! - `ExecutionError`: the execution bridge could not start a run

use missionctl_core::{TriggerNodeId, flatten_report};
use missionctl_scheduler::ScheduleError;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Failure categories reported across the trigger contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    /// Bad config or input, rejected before any resource was acquired.
    ValidationError,
    /// The external identity is already in use by another listener.
    ConflictError,
    /// A platform call failed, including credential rejection.
    ExternalServiceError,
    /// Anything unexpected, including caught panics.
    InternalError,
}

impl ErrorType {
    /// Returns the wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "ValidationError",
            Self::ConflictError => "ConflictError",
            Self::ExternalServiceError => "ExternalServiceError",
            Self::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error returned by trigger operations.
///
/// `user_message` is safe to show to end users. `trace` collects one
/// breadcrumb per layer the failure crossed and is meant for logs only; it
/// is never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerFailure {
    pub user_message: String,
    pub error: String,
    pub error_type: ErrorType,
    #[serde(default)]
    pub error_data: JsonValue,
    #[serde(default, skip_serializing)]
    pub trace: Vec<String>,
}

impl TriggerFailure {
    fn new(error_type: ErrorType, user_message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            error: error.into(),
            error_type,
            error_data: JsonValue::Object(Map::new()),
            trace: Vec::new(),
        }
    }

    /// A config or input problem.
    #[must_use]
    pub fn validation(user_message: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(ErrorType::ValidationError, user_message, error)
    }

    /// An identity conflict with another listener.
    #[must_use]
    pub fn conflict(user_message: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(ErrorType::ConflictError, user_message, error)
    }

    /// A failed call to `service`.
    #[must_use]
    pub fn external<C>(service: &str, report: &Report<C>) -> Self
    where
        Report<C>: fmt::Display,
    {
        Self::new(
            ErrorType::ExternalServiceError,
            format!("Could not reach {service}. Check the credentials and try again."),
            flatten_report(report),
        )
        .with_data("service", service)
    }

    /// An unexpected failure.
    #[must_use]
    pub fn internal(error: impl Into<String>) -> Self {
        Self::new(
            ErrorType::InternalError,
            "Something went wrong while managing this trigger.",
            error,
        )
    }

    /// Stop was requested for a node with no running listener.
    #[must_use]
    pub fn no_active_listener(trigger_node_id: &TriggerNodeId) -> Self {
        Self::validation(
            "This trigger is not running.",
            format!("no active listener for trigger node {trigger_node_id}"),
        )
        .with_data("triggerNodeId", trigger_node_id.to_string())
    }

    /// Adds a field to `error_data`.
    #[must_use]
    pub fn with_data(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        if let JsonValue::Object(map) = &mut self.error_data {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    /// Appends a breadcrumb for the layer the failure is passing through.
    #[must_use]
    pub fn at(mut self, layer: impl Into<String>) -> Self {
        self.trace.push(layer.into());
        self
    }

    /// Returns true for `ValidationError` failures.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        self.error_type == ErrorType::ValidationError
    }
}

impl fmt::Display for TriggerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.error)
    }
}

impl std::error::Error for TriggerFailure {}

impl From<ScheduleError> for TriggerFailure {
    fn from(err: ScheduleError) -> Self {
        let failure = Self::validation(format!("The schedule is invalid: {err}."), err.to_string());
        match &err {
            ScheduleError::MissingField { field } | ScheduleError::InvalidField { field, .. } => {
                failure.with_data("field", *field)
            }
            ScheduleError::UnknownMode { mode } => failure.with_data("scheduleType", mode.as_str()),
            ScheduleError::EvaluationFailed { .. } => failure,
        }
    }
}

/// Errors from a listener store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Another node already holds this listener identity.
    KeyInUse { owner: TriggerNodeId },
    /// The backing store refused the write.
    StoreFailed { reason: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyInUse { owner } => {
                write!(f, "listener identity already held by trigger node {owner}")
            }
            Self::StoreFailed { reason } => write!(f, "failed to store listener: {reason}"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Errors from the execution bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The execution service answered with a failure status.
    Rejected { status: u16, body: String },
    /// The execution service could not be reached.
    Unavailable { reason: String },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { status, body } => {
                write!(f, "execution rejected with status {status}: {body}")
            }
            Self::Unavailable { reason } => write!(f, "execution service unavailable: {reason}"),
        }
    }
}

impl std::error::Error for ExecutionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_serializes_camel_case() {
        let failure = TriggerFailure::validation("Bad config.", "missing bot_token")
            .with_data("field", "bot_token")
            .at("discord.validate");
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["userMessage"], "Bad config.");
        assert_eq!(json["errorType"], "ValidationError");
        assert_eq!(json["errorData"]["field"], "bot_token");
        assert!(json.get("trace").is_none());
        assert_eq!(failure.trace, vec!["discord.validate"]);
    }

    #[test]
    fn trace_is_append_only() {
        let failure = TriggerFailure::internal("boom").at("adapter").at("runtime");
        assert_eq!(failure.trace, vec!["adapter", "runtime"]);
    }

    #[test]
    fn schedule_errors_become_validation_failures() {
        let failure: TriggerFailure = ScheduleError::MissingField { field: "time" }.into();
        assert!(failure.is_validation());
        assert_eq!(failure.error_data["field"], "time");
    }

    #[test]
    fn no_active_listener_names_node() {
        let node = TriggerNodeId::new();
        let failure = TriggerFailure::no_active_listener(&node);
        assert_eq!(failure.error_type, ErrorType::ValidationError);
        assert!(failure.error.contains(&node.to_string()));
    }
}
