//! TTS dispatch
//!
//! The dispatcher is the only component that talks to TTS backends over the
//! network. It turns one `(model, voice, text)` into one `audio/wav` blob:
//! acquire a backend slot, POST an OpenAI-compatible speech request, and
//! retry on a different backend when the upstream misbehaves. All mutable
//! state lives in the backend pool and the token rotator; the dispatcher
//! itself is stateless across calls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use reqwest::StatusCode;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::cache::Synthesize;
use super::{BackendLease, BackendPool, TokenRotator, TtsError};

const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(250);
const RETRY_BACKOFF_CEILING: Duration = Duration::from_secs(2);
const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of a single attempt against one backend.
enum AttemptError {
    /// The request is bad; the backend is healthy. Do not retry.
    Fatal(String),
    /// 5xx/429/timeout/transport. Retry on another backend.
    Retryable(String),
}

/// Load-balancing synthesis client over the backend pool.
pub struct TtsDispatcher {
    pool: Arc<BackendPool>,
    client: reqwest::Client,
    tokens: TokenRotator,
    retry_count: u32,
    extra_params: Option<serde_json::Value>,
}

impl TtsDispatcher {
    pub fn new(
        pool: Arc<BackendPool>,
        client: reqwest::Client,
        tokens: TokenRotator,
        retry_count: u32,
        extra_params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            pool,
            client,
            tokens,
            retry_count,
            extra_params,
        }
    }

    /// Build the OpenAI-compatible speech request body. Extra configured
    /// parameters are merged in as-is; they are opaque to the dispatcher.
    fn request_body(&self, model: &str, voice: &str, text: &str) -> serde_json::Value {
        let mut body = json!({
            "model": model,
            "input": text,
            "voice": voice,
            "response_format": "wav",
        });
        if let Some(serde_json::Value::Object(extra)) = &self.extra_params {
            let obj = body.as_object_mut().expect("body is an object");
            for (key, value) in extra {
                obj.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        body
    }

    async fn attempt(
        &self,
        lease: &BackendLease,
        body: &serde_json::Value,
        deadline: Instant,
    ) -> Result<Bytes, AttemptError> {
        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .max(MIN_REQUEST_TIMEOUT);

        let mut request = self
            .client
            .post(format!("{}/v1/audio/speech", lease.url()))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .timeout(remaining)
            .json(body);
        if let Some(token) = self.tokens.next() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                AttemptError::Retryable("request timeout".to_string())
            } else {
                AttemptError::Retryable(format!("transport error: {err}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let audio = response
                .bytes()
                .await
                .map_err(|err| AttemptError::Retryable(format!("body read error: {err}")))?;

            if !content_type.starts_with("audio/") || audio.is_empty() {
                return Err(AttemptError::Retryable(format!(
                    "unexpected response: content-type '{content_type}', {} bytes",
                    audio.len()
                )));
            }
            return Ok(audio);
        }

        let detail = response.text().await.unwrap_or_default();
        let detail = detail.chars().take(200).collect::<String>();
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            Err(AttemptError::Fatal(format!("HTTP {status}: {detail}")))
        } else {
            Err(AttemptError::Retryable(format!("HTTP {status}: {detail}")))
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = RETRY_BACKOFF_BASE
            .checked_mul(1u32 << attempt.min(16))
            .map_or(RETRY_BACKOFF_CEILING, |d| d.min(RETRY_BACKOFF_CEILING));
        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        base.mul_f64(jitter)
    }
}

#[async_trait]
impl Synthesize for TtsDispatcher {
    async fn synthesize(
        &self,
        model: &str,
        voice: &str,
        text: &str,
        deadline: Instant,
    ) -> Result<Bytes, TtsError> {
        self.pool.note_request();
        let body = self.request_body(model, voice, text);

        let mut last_error: Option<TtsError> = None;
        for attempt in 0..=self.retry_count {
            if attempt > 0 {
                let delay = self.backoff_delay(attempt - 1);
                if Instant::now() + delay >= deadline {
                    break;
                }
                tokio::time::sleep(delay).await;
            }

            let lease = match self.pool.acquire(deadline).await {
                Ok(lease) => lease,
                Err(err) => {
                    last_error.get_or_insert(err);
                    break;
                }
            };

            let started = Instant::now();
            match self.attempt(&lease, &body, deadline).await {
                Ok(audio) => {
                    lease.report_success(started.elapsed());
                    self.pool.note_success();
                    debug!(
                        url = %lease.url(),
                        bytes = audio.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "tts synthesis succeeded"
                    );
                    return Ok(audio);
                }
                Err(AttemptError::Fatal(message)) => {
                    // The backend answered; only the request is at fault.
                    lease.report_success(started.elapsed());
                    self.pool.note_failure();
                    return Err(TtsError::BadRequest(message));
                }
                Err(AttemptError::Retryable(message)) => {
                    lease.report_failure();
                    warn!(
                        url = %lease.url(),
                        attempt = attempt + 1,
                        attempts = self.retry_count + 1,
                        error = %message,
                        "tts attempt failed"
                    );
                    last_error = Some(TtsError::Upstream(message));
                }
            }
        }

        self.pool.note_failure();
        Err(last_error.unwrap_or(TtsError::Timeout))
    }
}
