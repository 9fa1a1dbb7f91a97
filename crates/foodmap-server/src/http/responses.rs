//! HTTP request and response types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use foodmap_core::{CoreError, JobView};
use serde::Serialize;

// ============================================================================
// Submission types
// ============================================================================

/// Response body for an accepted poll-mode submission.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
}

// ============================================================================
// Error types
// ============================================================================

/// Error details.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorObject {
    pub message: String,

    #[serde(rename = "type")]
    pub error_type: String,

    pub code: String,

    /// Offending request field for validation errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

/// Error response wrapper.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

/// API errors with their HTTP status codes.
#[derive(Debug)]
pub enum ApiError {
    // Client errors (4xx)
    /// Invalid JSON in request body.
    InvalidJson { message: String },
    /// Query string could not be decoded.
    InvalidQuery { message: String },
    /// Missing required field.
    MissingField { field: &'static str },
    /// Invalid field value.
    InvalidField {
        field: &'static str,
        message: String,
    },
    /// Unknown job id.
    JobNotFound,

    // Server errors (5xx)
    /// Internal server error.
    Internal { message: String },
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::MissingField(field) => ApiError::MissingField { field },
            CoreError::InvalidField { field, message } => ApiError::InvalidField { field, message },
            CoreError::JobNotFound(_) => ApiError::JobNotFound,
            other => ApiError::Internal {
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, code, message, param) = match self {
            ApiError::InvalidJson { message } => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_json",
                message,
                None,
            ),
            ApiError::InvalidQuery { message } => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_query",
                message,
                None,
            ),
            ApiError::MissingField { field } => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "missing_field",
                format!("Missing required field: {}", field),
                Some(field.to_string()),
            ),
            ApiError::InvalidField { field, message } => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_field",
                format!("Invalid field '{}': {}", field, message),
                Some(field.to_string()),
            ),
            ApiError::JobNotFound => {
                // Pollers read the same shape as a failed job.
                let body = JobView::Error {
                    error: "Job not found".to_string(),
                };
                return (StatusCode::NOT_FOUND, Json(body)).into_response();
            }
            ApiError::Internal { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "internal_error",
                message,
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorObject {
                message,
                error_type: error_type.to_string(),
                code: code.to_string(),
                param,
            },
        };

        (status, Json(body)).into_response()
    }
}
