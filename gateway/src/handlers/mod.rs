//! HTTP request handlers
//!
//! - `api` - service info, health and cache admin endpoints
//! - `chat` - chat-completion passthrough with TTS prefetch
//! - `speech` - speech synthesis endpoint backed by the cache

pub mod api;
pub mod chat;
pub mod speech;
