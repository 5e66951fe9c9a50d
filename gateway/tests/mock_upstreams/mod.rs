//! In-process mock upstreams for integration tests
//!
//! Simulates the two external collaborators: an SSE chat-completion upstream
//! and OpenAI-compatible TTS backends with configurable latency and failure
//! behavior.

// Not every test binary exercises every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde_json::json;

use overtone_gateway::ServerConfig;

/// Minimal RIFF header so responses look like real wav blobs.
pub const WAV_BYTES: &[u8] = b"RIFF\x24\x00\x00\x00WAVEfmt mock-pcm-payload";

/// Mock TTS backend state.
pub struct MockTts {
    hits: AtomicUsize,
    delay: Duration,
    status: StatusCode,
}

impl MockTts {
    pub fn ok(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            hits: AtomicUsize::new(0),
            delay,
            status: StatusCode::OK,
        })
    }

    pub fn failing(status: StatusCode) -> Arc<Self> {
        Arc::new(Self {
            hits: AtomicUsize::new(0),
            delay: Duration::ZERO,
            status,
        })
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn tts_handler(State(state): State<Arc<MockTts>>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    if state.status == StatusCode::OK {
        ([(header::CONTENT_TYPE, "audio/wav")], WAV_BYTES).into_response()
    } else {
        (
            state.status,
            axum::Json(json!({"error": {"message": "mock backend failure"}})),
        )
            .into_response()
    }
}

/// Serve a router on an ephemeral port, returning its base URL.
pub async fn spawn_app(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub async fn spawn_tts(mock: Arc<MockTts>) -> String {
    let app = Router::new()
        .route("/v1/audio/speech", post(tts_handler))
        .with_state(mock);
    spawn_app(app).await
}

/// Build the SSE body of one streamed chat completion: a role chunk, one
/// content chunk per delta, a finish chunk, and the `[DONE]` sentinel.
pub fn sse_chat_body(model: &str, deltas: &[&str]) -> String {
    let chunk = |delta: serde_json::Value, finish: serde_json::Value| {
        format!(
            "data: {}\n\n",
            json!({
                "id": "chatcmpl-test",
                "object": "chat.completion.chunk",
                "created": 1700000000,
                "model": model,
                "choices": [{"index": 0, "delta": delta, "finish_reason": finish}],
            })
        )
    };

    let mut body = chunk(json!({"role": "assistant"}), json!(null));
    for delta in deltas {
        body.push_str(&chunk(json!({"content": delta}), json!(null)));
    }
    body.push_str(&chunk(json!({}), json!("stop")));
    body.push_str("data: [DONE]\n\n");
    body
}

/// Mock chat upstream that emits the given bytes (typically an incomplete
/// SSE event) and then stalls without ever finishing the stream.
pub async fn spawn_stalling_llm(partial: String) -> String {
    let handler = move || {
        let partial = partial.clone();
        async move {
            let stream = futures::stream::unfold(Some(partial), |state| async move {
                match state {
                    Some(bytes) => Some((
                        Ok::<_, std::convert::Infallible>(bytes::Bytes::from(bytes)),
                        None,
                    )),
                    None => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        None
                    }
                }
            });
            (
                [(header::CONTENT_TYPE, "text/event-stream; charset=utf-8")],
                axum::body::Body::from_stream(stream),
            )
                .into_response()
        }
    };
    let app = Router::new().route("/v1/chat/completions", post(handler));
    spawn_app(app).await
}

/// Mock chat upstream that answers every request with the given SSE body.
pub async fn spawn_llm(body: String) -> String {
    let handler = move || {
        let body = body.clone();
        async move {
            (
                [(header::CONTENT_TYPE, "text/event-stream; charset=utf-8")],
                body,
            )
                .into_response()
        }
    };
    let app = Router::new().route("/v1/chat/completions", post(handler));
    spawn_app(app).await
}

/// Gateway config pointing at mock upstreams.
pub fn test_config(llm_url: &str, tts_urls: &str, extra: &[(&str, &str)]) -> ServerConfig {
    let mut env: HashMap<String, String> = HashMap::from([
        ("NEWAPI_BASE_URL".to_string(), llm_url.to_string()),
        ("NEWAPI_API_KEY".to_string(), "sk-upstream-test".to_string()),
        ("TTS_ENDPOINTS".to_string(), tts_urls.to_string()),
    ]);
    for (key, value) in extra {
        env.insert(key.to_string(), value.to_string());
    }
    ServerConfig::from_lookup(|key| env.get(key).cloned()).unwrap()
}
