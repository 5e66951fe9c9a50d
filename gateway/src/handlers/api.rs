//! Ops surface: service info, health, cache admin, model listings
//!
//! None of these endpoints require authentication and none of them block on
//! I/O; health reads in-memory snapshots only.

use axum::{extract::State, response::Json};
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::state::AppState;

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// `GET /` - service info
pub async fn root() -> Json<Value> {
    Json(json!({
        "service": "overtone-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "chat proxy with speculative TTS prefetch",
    }))
}

/// `GET /health` - backend and cache snapshots, never blocks on I/O
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let (requests, successes, failures) = state.pool.totals();
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "backends": state.pool.stats(),
        "balancer": {
            "total_requests": requests,
            "successful_requests": successes,
            "failed_requests": failures,
        },
        "cache": state.cache.stats(),
    }))
}

/// `GET /cache/stats`
pub async fn cache_stats(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::to_value(state.cache.stats()).unwrap_or_default())
}

/// `POST /cache/clear`
pub async fn cache_clear(State(state): State<AppState>) -> Json<Value> {
    let cleared = state.cache.clear();
    Json(json!({"cleared": cleared}))
}

/// `GET /v1/models` - static list, OpenAI compatible
pub async fn list_models(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "object": "list",
        "data": [
            {
                "id": state.config.tts_default_model,
                "object": "model",
                "created": now_unix_secs(),
                "owned_by": "overtone",
            }
        ]
    }))
}

/// `GET /v1/audio/models` - static list of speech models and voices
pub async fn list_audio_models(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "object": "list",
        "data": [
            {
                "id": state.config.tts_default_model,
                "object": "model",
                "created": now_unix_secs(),
                "owned_by": "overtone",
                "voices": [state.config.tts_default_voice],
            }
        ]
    }))
}
