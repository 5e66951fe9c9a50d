//! Bearer token rotation for TTS backends
//!
//! Some deployments run one backend URL with many API tokens instead of many
//! URLs with one token each. The rotator hands out tokens round-robin,
//! advancing on every draw (not on success), shared across all requests.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Thread-safe round-robin token pool. Empty pool means anonymous requests.
#[derive(Debug, Default)]
pub struct TokenRotator {
    tokens: Vec<String>,
    cursor: AtomicUsize,
}

impl TokenRotator {
    pub fn new(tokens: Vec<String>) -> Self {
        Self {
            tokens,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Draw the next token, or `None` when no tokens are configured.
    pub fn next(&self) -> Option<&str> {
        if self.tokens.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.tokens.len();
        Some(&self.tokens[idx])
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
