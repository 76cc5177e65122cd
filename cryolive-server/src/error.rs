//! HTTP/WebSocket-facing error taxonomy. Mirrors the teacher's
//! `AppError{status, message}` + `IntoResponse` pattern (`ferrex-server/src/errors.rs`),
//! generalized with `From` conversions from the core error types (§7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

use cryolive_contracts::StoreError;
use cryolive_core::CoreError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Validation(msg) => Self::bad_request(msg),
            CoreError::Auth(msg) => Self::unauthorized(msg),
            CoreError::AccessDenied => Self::forbidden("access denied"),
            CoreError::NotFound => Self::not_found("not found"),
            CoreError::SchedulerUnavailable(msg) => Self::internal(msg),
            CoreError::Builder(e) => Self::bad_request(e.to_string()),
            CoreError::JobFailed(msg) => Self::bad_request(msg),
            CoreError::Internal(msg) => Self::internal(msg),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::not_found("not found"),
            StoreError::Backend(msg) => Self::internal(msg),
        }
    }
}

impl From<cryolive_config::ConfigError> for AppError {
    fn from(e: cryolive_config::ConfigError) -> Self {
        Self::internal(e.to_string())
    }
}
