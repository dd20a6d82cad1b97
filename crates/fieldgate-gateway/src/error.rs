//! Error handling for the gateway.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fieldgate_core::SecurityError;
use serde::Serialize;
use tracing::{debug, error};

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    /// No valid credential on the request.
    Unauthenticated(String),
    /// Login credentials did not match.
    InvalidCredentials(String),
    /// Malformed request body or query.
    BadRequest(String),
    /// The configured authenticator does not offer this operation.
    NotSupported(String),
    /// Session or policy storage is unavailable.
    Unavailable(String),
    /// Internal server error.
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error flag.
    pub error: bool,
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", msg),
            AppError::InvalidCredentials(msg) => {
                (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS", msg)
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            AppError::NotSupported(msg) => (StatusCode::NOT_FOUND, "NOT_SUPPORTED", msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg),
            AppError::Internal(msg) => {
                error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
            }
        };

        let body = ErrorResponse {
            error: true,
            code: code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<SecurityError> for AppError {
    fn from(err: SecurityError) -> Self {
        if err.is_auth_failure() {
            debug!(error = %err, "authentication failed");
        }
        match err {
            SecurityError::Unauthenticated(msg) => AppError::Unauthenticated(msg),
            SecurityError::InvalidCredentials(msg) => AppError::InvalidCredentials(msg),
            SecurityError::Storage(msg) | SecurityError::PolicyLoad(msg) => {
                AppError::Unavailable(msg)
            }
            other @ (SecurityError::Configuration(_)
            | SecurityError::Serialization(_)
            | SecurityError::Token(_)) => AppError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(format!("JSON error: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}
