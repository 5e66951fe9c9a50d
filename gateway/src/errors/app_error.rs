//! Application error types
//!
//! Every client-visible failure maps to one `AppError` variant, which renders
//! as an OpenAI-style `{"error": {...}}` JSON body with the matching status
//! code. Internal subsystems carry their own error types (`TtsError` for the
//! synthesis path) and convert at the handler boundary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::core::tts::TtsError;

/// Result type for handler-level operations
pub type AppResult<T> = Result<T, AppError>;

/// Client-visible error taxonomy
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or invalid bearer token
    #[error("invalid or missing bearer token")]
    Auth,

    /// Malformed request body or parameters
    #[error("{0}")]
    BadRequest(String),

    /// LLM or TTS upstream failed after retries were exhausted
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// Waiting on a synthesis result exceeded the request deadline
    #[error("timed out waiting for synthesis")]
    Timeout,

    /// Invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Auth => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            AppError::Auth => "authentication_error",
            AppError::BadRequest(_) => "invalid_request_error",
            AppError::Upstream(_) => "upstream_error",
            AppError::Timeout => "timeout_error",
            AppError::Internal(_) => "server_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "code": status.as_str(),
            }
        }));
        (status, body).into_response()
    }
}

impl From<TtsError> for AppError {
    fn from(err: TtsError) -> Self {
        match err {
            TtsError::BadRequest(msg) => AppError::BadRequest(msg),
            TtsError::Upstream(msg) => AppError::Upstream(msg),
            TtsError::Timeout => AppError::Timeout,
        }
    }
}
