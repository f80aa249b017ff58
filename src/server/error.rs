//! HTTP error mapping.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::error::TaskhookError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub status: &'static str,
    /// Stable machine-readable code.
    pub error: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<TaskhookError> for ApiError {
    fn from(err: TaskhookError) -> Self {
        let (status, code) = match &err {
            TaskhookError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            TaskhookError::AlreadyExists(_)
            | TaskhookError::Conflict(_)
            | TaskhookError::InvalidTransition { .. }
            | TaskhookError::NotAwaitingValidation { .. }
            | TaskhookError::NotValidated { .. }
            | TaskhookError::MaxIterationsExceeded { .. } => (StatusCode::CONFLICT, "conflict"),
            _ => {
                error!(error = %err, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiErrorBody {
                status: "error",
                error: self.code,
                message: self.message,
            }),
        )
            .into_response()
    }
}
