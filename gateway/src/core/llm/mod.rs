//! LLM upstream proxying
//!
//! Wire types for OpenAI-compatible chat-completion streams plus the
//! streaming client that tees upstream SSE events to the downstream relay and
//! the sentence segmenter.

mod client;

pub use client::LlmClient;

use serde::Deserialize;

/// One parsed `chat.completion.chunk` SSE payload. Only the fields the proxy
/// actually reads; everything else passes through untouched as raw bytes.
#[derive(Debug, Deserialize)]
pub struct ChatStreamChunk {
    pub id: Option<String>,
    pub model: Option<String>,
    pub created: Option<u64>,
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Option<StreamDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatStreamChunk {
    /// The assistant-text delta carried by this chunk, if any.
    pub fn content_delta(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.as_ref())
            .and_then(|delta| delta.content.as_deref())
    }
}
