//! HTTP mapping for trigger failures.
//!
//! The status follows the failure's [`ErrorType`]. The breadcrumb trace is
//! logged and never sent to the caller.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use missionctl_trigger::{ErrorType, TriggerFailure};
use serde_json::json;

/// A trigger failure on its way out as a response.
#[derive(Debug)]
pub struct ApiError(pub TriggerFailure);

impl From<TriggerFailure> for ApiError {
    fn from(failure: TriggerFailure) -> Self {
        Self(failure)
    }
}

fn status_for(error_type: ErrorType) -> StatusCode {
    match error_type {
        ErrorType::ValidationError => StatusCode::BAD_REQUEST,
        ErrorType::ConflictError => StatusCode::CONFLICT,
        ErrorType::ExternalServiceError => StatusCode::BAD_GATEWAY,
        ErrorType::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let failure = self.0;
        let status = status_for(failure.error_type);
        if status.is_server_error() {
            tracing::error!(error = %failure, trace = ?failure.trace, "trigger request failed");
        } else {
            tracing::debug!(error = %failure, trace = ?failure.trace, "trigger request rejected");
        }

        let body = json!({
            "userMessage": failure.user_message,
            "error": failure.error,
            "errorType": failure.error_type,
            "errorData": failure.error_data,
        });
        (status, Json(body)).into_response()
    }
}
