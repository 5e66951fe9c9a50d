//! Chat-completion endpoint with TTS prefetch
//!
//! `POST /v1/chat/completions` forwards the request to the LLM upstream and
//! relays the SSE stream byte-exact while side-channeling assistant text into
//! the segmenter. Every completed sentence is submitted to the cache, so by
//! the time the client asks `/v1/audio/speech` for a sentence its audio is
//! usually cached or already in flight.
//!
//! Clients that send `stream: false` get one assembled JSON response, but the
//! upstream is still consumed in streaming mode and prefetch runs live during
//! generation.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

use crate::core::llm::ChatStreamChunk;
use crate::core::segment::{SegmenterConfig, SentenceSegmenter};
use crate::core::tts::TtsCache;
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// Prefetch side channel for one chat stream: segments assistant text and
/// submits each sentence to the cache, in emission order.
struct PrefetchSink {
    enabled: bool,
    model: String,
    voice: String,
    segmenter: SentenceSegmenter,
    cache: Arc<TtsCache>,
    submitted: usize,
}

impl PrefetchSink {
    /// Strip the proxy-only `tts_*` fields from the request body and resolve
    /// them against config defaults.
    fn take_from(body: &mut serde_json::Map<String, Value>, state: &AppState) -> Self {
        let enabled = body
            .remove("tts_enabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let model = body
            .remove("tts_model")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| state.config.tts_default_model.clone());
        let voice = body
            .remove("tts_voice")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| state.config.tts_default_voice.clone());

        Self {
            enabled,
            model,
            voice,
            segmenter: SentenceSegmenter::new(SegmenterConfig {
                min_len: state.config.segment_min_len,
                max_len: state.config.segment_max_len,
            }),
            cache: Arc::clone(&state.cache),
            submitted: 0,
        }
    }

    fn feed(&mut self, text: &str) {
        if !self.enabled {
            return;
        }
        for sentence in self.segmenter.feed(text) {
            self.cache.submit(&self.model, &self.voice, &sentence);
            self.submitted += 1;
        }
    }

    /// Submit the residual buffer on end-of-stream.
    fn finish(&mut self) {
        if !self.enabled {
            return;
        }
        if let Some(residual) = self.segmenter.flush() {
            self.cache.submit(&self.model, &self.voice, &residual);
            self.submitted += 1;
        }
        if self.submitted > 0 {
            info!(
                sentences = self.submitted,
                model = %self.model,
                voice = %self.voice,
                "tts prefetch submitted"
            );
        }
    }
}

/// `POST /v1/chat/completions`
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> AppResult<Response> {
    let Value::Object(mut body) = body else {
        return Err(AppError::BadRequest(
            "request body must be a JSON object".to_string(),
        ));
    };

    let prefetch = PrefetchSink::take_from(&mut body, &state);
    let client_wants_stream = body
        .get("stream")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let body = Value::Object(body);

    if client_wants_stream {
        Ok(stream_response(state, body, prefetch))
    } else {
        buffered_response(state, body, prefetch).await
    }
}

/// Relay the upstream SSE stream byte-exact. The relay task owns the
/// prefetch sink; a failed side channel never interrupts the chunk relay,
/// and a client disconnect stops the relay without cancelling synthesis
/// already submitted.
fn stream_response(state: AppState, body: Value, mut prefetch: PrefetchSink) -> Response {
    let (tx, rx) = mpsc::unbounded_channel::<Result<Bytes, Infallible>>();

    let llm = Arc::clone(&state.llm);
    tokio::spawn(async move {
        let relay = tx.clone();
        let result = llm
            .stream_chat(
                body,
                |raw| {
                    relay
                        .send(Ok(raw))
                        .map_err(|_| AppError::Upstream("client disconnected".to_string()))
                },
                |text| prefetch.feed(text),
            )
            .await;

        if let Err(err) = result {
            warn!(error = %err, "chat stream terminated");
            let payload = json!({
                "error": {
                    "message": err.to_string(),
                    "type": "upstream_error",
                }
            });
            let _ = tx.send(Ok(Bytes::from(format!(
                "data: {payload}\n\ndata: [DONE]\n\n"
            ))));
        }
        // Prefetch whatever text made it through, even on error or disconnect
        prefetch.finish();
    });

    let body = Body::from_stream(UnboundedReceiverStream::new(rx));
    (
        [
            (header::CONTENT_TYPE, "text/event-stream; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// Consume the upstream stream and assemble one non-streaming
/// `chat.completion` response; prefetch still runs live during generation.
async fn buffered_response(
    state: AppState,
    body: Value,
    mut prefetch: PrefetchSink,
) -> AppResult<Response> {
    let requested_model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let mut content = String::new();
    let mut meta: Option<(Option<String>, Option<String>, Option<u64>)> = None;

    let result = state
        .llm
        .stream_chat(
            body,
            |raw| {
                if meta.is_none() {
                    meta = parse_chunk_meta(&raw);
                }
                Ok(())
            },
            |text| {
                content.push_str(text);
                prefetch.feed(text);
            },
        )
        .await;

    prefetch.finish();
    result?;

    let (id, model, created) = meta.unwrap_or((None, None, None));
    let created = created.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    });

    let response = json!({
        "id": id.unwrap_or_else(|| "chatcmpl-proxy".to_string()),
        "object": "chat.completion",
        "created": created,
        "model": model.unwrap_or(requested_model),
        "choices": [
            {
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": content,
                },
                "finish_reason": "stop",
            }
        ],
    });

    Ok(Json(response).into_response())
}

/// Pull `(id, model, created)` out of the first parseable `data:` payload of
/// a raw SSE event.
fn parse_chunk_meta(raw: &[u8]) -> Option<(Option<String>, Option<String>, Option<u64>)> {
    let text = std::str::from_utf8(raw).ok()?;
    for line in text.lines() {
        let Some(payload) = line.strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == "[DONE]" {
            continue;
        }
        if let Ok(chunk) = serde_json::from_str::<ChatStreamChunk>(payload) {
            return Some((chunk.id, chunk.model, chunk.created));
        }
    }
    None
}
