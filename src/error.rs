// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    // 403: no assignment grants the caller this test
    NotAssigned,

    // 403: every matching assignment is past its deadline
    AssignmentExpired,

    // 404
    TestNotFound,

    // 404: missing, or owned by someone else
    AttemptNotFound,

    // 409: write attempted on a Completed / PendingReview attempt
    AttemptAlreadyFinalized,

    // 403
    Forbidden(String),

    // 404
    NotFound(String),

    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    AuthError(String),

    // 500: storage write or read failed, transaction rolled back
    PersistenceFailure(String),

    // 500 Internal Server Error
    InternalServerError(String),
}

impl AppError {
    /// Stable machine-readable code sent next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotAssigned => "not_assigned",
            AppError::AssignmentExpired => "assignment_expired",
            AppError::TestNotFound => "test_not_found",
            AppError::AttemptNotFound => "attempt_not_found",
            AppError::AttemptAlreadyFinalized => "attempt_already_finalized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::AuthError(_) => "unauthorized",
            AppError::PersistenceFailure(_) => "persistence_failure",
            AppError::InternalServerError(_) => "internal_error",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotAssigned => write!(f, "You are not assigned to this test"),
            AppError::AssignmentExpired => write!(f, "The assignment for this test has expired"),
            AppError::TestNotFound => write!(f, "Test not found"),
            AppError::AttemptNotFound => write!(f, "Attempt not found"),
            AppError::AttemptAlreadyFinalized => {
                write!(f, "This attempt has already been submitted")
            }
            AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::AuthError(msg) => write!(f, "{}", msg),
            AppError::PersistenceFailure(msg) => write!(f, "Persistence failure: {}", msg),
            AppError::InternalServerError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotAssigned | AppError::AssignmentExpired | AppError::Forbidden(_) => {
                StatusCode::FORBIDDEN
            }
            AppError::TestNotFound | AppError::AttemptNotFound | AppError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            AppError::AttemptAlreadyFinalized => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::PersistenceFailure(_) | AppError::InternalServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let error_message = match &self {
            AppError::PersistenceFailure(msg) | AppError::InternalServerError(msg) => {
                tracing::error!("{}: {}", self.code(), msg);
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError::PersistenceFailure`.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::PersistenceFailure(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
