//! Router assembly
//!
//! The OpenAI-compatible POST endpoints sit behind bearer authentication;
//! the ops surface (service info, health, cache admin, model listings) is
//! open. Cross-cutting layers (CORS, tracing, rate limiting) are applied in
//! `main` on top of this router.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::handlers::{api, chat, speech};
use crate::middleware::auth_middleware;
use crate::state::AppState;

/// Build the complete application router.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/audio/speech", post(speech::create_speech))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let open = Router::new()
        .route("/", get(api::root))
        .route("/health", get(api::health_check))
        .route("/cache/stats", get(api::cache_stats))
        .route("/cache/clear", post(api::cache_clear))
        .route("/v1/models", get(api::list_models))
        .route("/v1/audio/models", get(api::list_audio_models));

    Router::new().merge(protected).merge(open).with_state(state)
}
