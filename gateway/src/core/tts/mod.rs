mod cache;
mod dispatcher;
mod fingerprint;
mod pool;
mod tokens;

pub use cache::{CacheStatsSnapshot, Synthesize, TtsCache};
pub use dispatcher::TtsDispatcher;
pub use fingerprint::fingerprint;
pub use pool::{BackendLease, BackendPool, BackendStat};
pub use tokens::TokenRotator;

use thiserror::Error;

/// Synthesis-path error taxonomy.
///
/// `Clone` because a failed flight's outcome is broadcast to every waiter of
/// the cache entry.
#[derive(Debug, Clone, Error)]
pub enum TtsError {
    /// The backend rejected the request itself (4xx other than 429); retrying
    /// would not help.
    #[error("tts backend rejected the request: {0}")]
    BadRequest(String),

    /// All attempts failed with 5xx/429/timeout/transport errors.
    #[error("tts synthesis failed: {0}")]
    Upstream(String),

    /// No backend slot became free (or no result arrived) before the deadline.
    #[error("tts request deadline exceeded")]
    Timeout,
}
