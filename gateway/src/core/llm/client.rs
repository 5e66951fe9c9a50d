//! Streaming chat client for the LLM upstream
//!
//! Always talks to the upstream in streaming mode and fans each SSE event out
//! two ways: the raw bytes go to `on_chunk` (the downstream relay, byte-exact
//! and first), the parsed assistant-text delta goes to `on_text` (the
//! prefetch side-channel). Side-channel processing must never slow down or
//! break the relay, so `on_text` is infallible.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, warn};

use super::ChatStreamChunk;
use crate::errors::AppError;

/// Client for the configured chat-completion upstream.
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    /// Budget for connecting and receiving response headers. Body streaming
    /// has no total timeout, only the idle timeout.
    header_timeout: Duration,
    /// Idle gap between upstream events before the stream is declared dead.
    idle_timeout: Duration,
}

impl LlmClient {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        api_key: String,
        header_timeout: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            header_timeout,
            idle_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Forward a chat-completion request upstream with `stream: true` forced,
    /// relaying every SSE event byte-exact through `on_chunk` and every
    /// assistant-text delta through `on_text`.
    ///
    /// Returns once the upstream stream ends. An error after relaying has
    /// begun still delivers everything received so far before surfacing.
    pub async fn stream_chat<C, T>(
        &self,
        mut body: serde_json::Value,
        mut on_chunk: C,
        mut on_text: T,
    ) -> Result<(), AppError>
    where
        C: FnMut(Bytes) -> Result<(), AppError>,
        T: FnMut(&str),
    {
        body["stream"] = serde_json::Value::Bool(true);

        let request = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body);

        let response = tokio::time::timeout(self.header_timeout, request.send())
            .await
            .map_err(|_| AppError::Upstream("llm upstream timed out".to_string()))?
            .map_err(|err| AppError::Upstream(format!("llm upstream unreachable: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(200).collect();
            return Err(AppError::Upstream(format!(
                "llm upstream returned {status}: {detail}"
            )));
        }

        let mut stream = response.bytes_stream();
        let mut pending = BytesMut::new();

        loop {
            let next = match tokio::time::timeout(self.idle_timeout, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    // Deliver any partial event before surfacing the timeout
                    self.relay_remainder(&mut pending, &mut on_chunk, &mut on_text)?;
                    return Err(AppError::Upstream("llm stream idle timeout".to_string()));
                }
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(err)) => {
                    self.relay_remainder(&mut pending, &mut on_chunk, &mut on_text)?;
                    return Err(AppError::Upstream(format!("llm stream error: {err}")));
                }
                None => break,
            };

            pending.extend_from_slice(&chunk);
            while let Some(end) = event_boundary(&pending) {
                let raw = pending.split_to(end).freeze();
                on_chunk(raw.clone())?;
                for text in extract_content_deltas(&raw) {
                    on_text(&text);
                }
            }
        }

        self.relay_remainder(&mut pending, &mut on_chunk, &mut on_text)?;
        debug!("llm stream complete");
        Ok(())
    }

    fn relay_remainder<C, T>(
        &self,
        pending: &mut BytesMut,
        on_chunk: &mut C,
        on_text: &mut T,
    ) -> Result<(), AppError>
    where
        C: FnMut(Bytes) -> Result<(), AppError>,
        T: FnMut(&str),
    {
        if pending.is_empty() {
            return Ok(());
        }
        let raw = pending.split().freeze();
        on_chunk(raw.clone())?;
        for text in extract_content_deltas(&raw) {
            on_text(&text);
        }
        Ok(())
    }
}

/// Byte offset just past the first complete SSE event (blank-line delimited),
/// or `None` if the buffer holds only a partial event.
fn event_boundary(buf: &[u8]) -> Option<usize> {
    let lf = find_subslice(buf, b"\n\n").map(|i| i + 2);
    let crlf = find_subslice(buf, b"\r\n\r\n").map(|i| i + 4);
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parse every `data:` line of one raw SSE event and collect the assistant
/// content deltas. `[DONE]`, non-JSON payloads and content-less chunks yield
/// nothing; parse failures are logged and swallowed because the relay is the
/// priority, not the side channel.
fn extract_content_deltas(raw: &[u8]) -> Vec<String> {
    let Ok(text) = std::str::from_utf8(raw) else {
        return Vec::new();
    };

    let mut deltas = Vec::new();
    for line in text.lines() {
        let Some(payload) = line.strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == "[DONE]" {
            continue;
        }
        match serde_json::from_str::<ChatStreamChunk>(payload) {
            Ok(chunk) => {
                if let Some(delta) = chunk.content_delta() {
                    deltas.push(delta.to_string());
                }
            }
            Err(err) => {
                warn!(error = %err, "unparseable chat stream payload");
            }
        }
    }
    deltas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_event_boundaries() {
        assert_eq!(event_boundary(b"data: x\n\nrest"), Some(9));
        assert_eq!(event_boundary(b"data: x\r\n\r\nrest"), Some(11));
        assert_eq!(event_boundary(b"data: partial"), None);
        assert_eq!(event_boundary(b""), None);
    }

    #[test]
    fn extracts_delta_from_event() {
        let raw =
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\n";
        assert_eq!(extract_content_deltas(raw), vec!["Hi"]);
    }

    #[test]
    fn done_sentinel_and_garbage_yield_nothing() {
        assert!(extract_content_deltas(b"data: [DONE]\n\n").is_empty());
        assert!(extract_content_deltas(b"data: not json\n\n").is_empty());
        assert!(extract_content_deltas(b": keep-alive comment\n\n").is_empty());
        assert!(extract_content_deltas(b"event: ping\n\n").is_empty());
    }

    #[test]
    fn null_content_yields_nothing() {
        let raw = b"data: {\"choices\":[{\"delta\":{\"content\":null},\"finish_reason\":null}]}\n\n";
        assert!(extract_content_deltas(raw).is_empty());
    }
}
