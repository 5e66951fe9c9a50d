//! Bearer-token authentication middleware
//!
//! Guards the OpenAI-compatible endpoints (`/v1/chat/completions`,
//! `/v1/audio/speech`). The ops surface stays open. When no `AUTH_API_KEY`
//! is configured, authentication is disabled and every request passes.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use crate::errors::AppError;
use crate::state::AppState;

/// Extract the token from an `Authorization: Bearer <token>` header.
fn extract_bearer(request: &Request) -> Option<&str> {
    request
        .headers()
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Constant-time byte comparison; the token is a shared secret.
fn tokens_match(provided: &str, expected: &str) -> bool {
    if provided.len() != expected.len() {
        return false;
    }
    provided
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Reject requests whose bearer token does not equal the configured key.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config.auth_api_key.as_deref() else {
        debug!("authentication disabled");
        return Ok(next.run(request).await);
    };

    match extract_bearer(&request) {
        Some(token) if tokens_match(token, expected) => Ok(next.run(request).await),
        Some(_) => {
            warn!(path = %request.uri().path(), "bearer token mismatch");
            Err(AppError::Auth)
        }
        None => {
            warn!(path = %request.uri().path(), "missing bearer token");
            Err(AppError::Auth)
        }
    }
}
