//! Shared application state
//!
//! One `AppState` is built at startup and cloned into every handler; all
//! fields are cheap `Arc` handles. HTTP connection pools are shared: one
//! client for the LLM upstream, one for the TTS backends.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::core::llm::LlmClient;
use crate::core::tts::{BackendPool, Synthesize, TokenRotator, TtsCache, TtsDispatcher};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub llm: Arc<LlmClient>,
    pub pool: Arc<BackendPool>,
    pub cache: Arc<TtsCache>,
}

impl AppState {
    /// Build the full pipeline from configuration and start the cache
    /// sweeper. Must run inside a tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        let llm_http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client");
        let tts_http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(config.tts_max_concurrent_per_endpoint)
            .build()
            .expect("reqwest client");

        let llm = Arc::new(LlmClient::new(
            llm_http,
            config.newapi_base_url.clone(),
            config.newapi_api_key.clone(),
            config.newapi_timeout(),
            config.newapi_idle_timeout(),
        ));

        let pool = Arc::new(BackendPool::new(
            config.tts_endpoints.clone(),
            config.tts_max_concurrent_per_endpoint,
        ));

        let dispatcher: Arc<dyn Synthesize> = Arc::new(TtsDispatcher::new(
            Arc::clone(&pool),
            tts_http,
            TokenRotator::new(config.tts_api_tokens.clone()),
            config.tts_retry_count,
            config.tts_extra_params.clone(),
        ));

        let cache = Arc::new(TtsCache::new(
            dispatcher,
            config.cache_max_size,
            config.cache_ttl(),
            config.tts_request_timeout(),
        ));
        let _ = cache.spawn_sweeper();

        Self {
            config: Arc::new(config),
            llm,
            pool,
            cache,
        }
    }
}
