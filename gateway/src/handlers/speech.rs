//! Speech synthesis endpoint
//!
//! `POST /v1/audio/speech` resolves the request against the TTS cache: a
//! prefetched sentence returns immediately, an in-flight one is awaited, and
//! a cold miss synthesizes on demand. The OpenAI-compat fields
//! `response_format` and `speed` are accepted but do not affect the cache key
//! (the backends only produce wav).

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::info;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SpeechRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub input: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub response_format: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub speed: Option<f64>,
}

/// `POST /v1/audio/speech`
pub async fn create_speech(
    State(state): State<AppState>,
    Json(request): Json<SpeechRequest>,
) -> AppResult<Response> {
    if request.input.trim().is_empty() {
        return Err(AppError::BadRequest("input must not be empty".to_string()));
    }

    let model = request
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.config.tts_default_model.clone());
    let voice = request
        .voice
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| state.config.tts_default_voice.clone());

    let started = Instant::now();
    let deadline = started + state.config.tts_request_timeout();
    let audio = state
        .cache
        .get(&model, &voice, &request.input, deadline)
        .await?;

    info!(
        model = %model,
        voice = %voice,
        input_len = request.input.chars().count(),
        bytes = audio.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "speech request served"
    );

    Ok((
        [
            (header::CONTENT_TYPE, "audio/wav"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        audio,
    )
        .into_response())
}
