//! Configuration module for the Overtone gateway
//!
//! Configuration is sourced from environment variables (with `.env` support
//! via `dotenvy` in `main`). Parsing is split from the environment lookup so
//! the whole surface is unit-testable without mutating process state.
//!
//! Required variables: `NEWAPI_BASE_URL`, `NEWAPI_API_KEY`, `TTS_ENDPOINTS`.
//! Everything else has a default.

use std::time::Duration;

use thiserror::Error;

/// Configuration loading/validation error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {var}: {reason}")]
    InvalidVar { var: &'static str, reason: String },
}

/// Server configuration
///
/// Contains everything needed to run the gateway:
/// - Listener settings (host, port, CORS, rate limiting)
/// - LLM upstream settings (base URL, API key, header timeout)
/// - TTS backend pool settings (endpoints, tokens, concurrency, retries)
/// - Cache settings (size, TTL)
/// - Segmenter settings (min/max sentence length)
/// - Client authentication (bearer key; empty disables auth)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Listener
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_rps: u32,
    pub rate_limit_burst: u32,

    // LLM upstream
    pub newapi_base_url: String,
    pub newapi_api_key: String,
    pub newapi_timeout_secs: u64,
    pub newapi_idle_timeout_secs: u64,

    // TTS backends
    pub tts_endpoints: Vec<String>,
    pub tts_api_tokens: Vec<String>,
    pub tts_default_model: String,
    pub tts_default_voice: String,
    pub tts_max_concurrent_per_endpoint: usize,
    pub tts_request_timeout_secs: u64,
    pub tts_retry_count: u32,
    /// Opaque JSON object merged into every synthesis request body
    pub tts_extra_params: Option<serde_json::Value>,

    // Cache
    pub cache_max_size: usize,
    pub cache_ttl_secs: u64,

    // Segmenter
    pub segment_min_len: usize,
    pub segment_max_len: usize,

    // Client auth (empty = open)
    pub auth_api_key: Option<String>,
}

impl ServerConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &'static str| -> Result<String, ConfigError> {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingVar(var))
        };

        fn parsed<T: std::str::FromStr>(
            raw: Option<String>,
            var: &'static str,
            default: T,
        ) -> Result<T, ConfigError> {
            match raw {
                Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidVar {
                    var,
                    reason: format!("could not parse '{raw}'"),
                }),
                None => Ok(default),
            }
        }

        fn comma_list(raw: Option<String>) -> Vec<String> {
            raw.map(|v| {
                v.split(',')
                    .map(|s| s.trim().trim_end_matches('/').to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
        }

        let tts_extra_params = match lookup("TTS_EXTRA_PARAMS") {
            Some(raw) if !raw.trim().is_empty() => {
                let value: serde_json::Value =
                    serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidVar {
                        var: "TTS_EXTRA_PARAMS",
                        reason: e.to_string(),
                    })?;
                if !value.is_object() {
                    return Err(ConfigError::InvalidVar {
                        var: "TTS_EXTRA_PARAMS",
                        reason: "must be a JSON object".to_string(),
                    });
                }
                Some(value)
            }
            _ => None,
        };

        let config = Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parsed(lookup("PORT"), "PORT", 8000)?,
            cors_allowed_origins: lookup("CORS_ALLOWED_ORIGINS").filter(|v| !v.trim().is_empty()),
            rate_limit_rps: parsed(lookup("RATE_LIMIT_RPS"), "RATE_LIMIT_RPS", 100)?,
            rate_limit_burst: parsed(lookup("RATE_LIMIT_BURST"), "RATE_LIMIT_BURST", 200)?,

            newapi_base_url: required("NEWAPI_BASE_URL")?.trim_end_matches('/').to_string(),
            newapi_api_key: required("NEWAPI_API_KEY")?,
            newapi_timeout_secs: parsed(lookup("NEWAPI_TIMEOUT"), "NEWAPI_TIMEOUT", 120)?,
            newapi_idle_timeout_secs: parsed(
                lookup("NEWAPI_IDLE_TIMEOUT"),
                "NEWAPI_IDLE_TIMEOUT",
                30,
            )?,

            tts_endpoints: comma_list(Some(required("TTS_ENDPOINTS")?)),
            tts_api_tokens: lookup("TTS_API_TOKENS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            tts_default_model: lookup("TTS_DEFAULT_MODEL").unwrap_or_else(|| "default".to_string()),
            tts_default_voice: lookup("TTS_DEFAULT_VOICE").unwrap_or_else(|| "alloy".to_string()),
            tts_max_concurrent_per_endpoint: parsed(
                lookup("TTS_MAX_CONCURRENT_PER_ENDPOINT"),
                "TTS_MAX_CONCURRENT_PER_ENDPOINT",
                3,
            )?,
            tts_request_timeout_secs: parsed(
                lookup("TTS_REQUEST_TIMEOUT"),
                "TTS_REQUEST_TIMEOUT",
                60,
            )?,
            tts_retry_count: parsed(lookup("TTS_RETRY_COUNT"), "TTS_RETRY_COUNT", 2)?,
            tts_extra_params,

            cache_max_size: parsed(lookup("CACHE_MAX_SIZE"), "CACHE_MAX_SIZE", 1000)?,
            cache_ttl_secs: parsed(lookup("CACHE_TTL"), "CACHE_TTL", 3600)?,

            segment_min_len: parsed(lookup("SEGMENT_MIN_LEN"), "SEGMENT_MIN_LEN", 5)?,
            segment_max_len: parsed(lookup("SEGMENT_MAX_LEN"), "SEGMENT_MAX_LEN", 40)?,

            auth_api_key: lookup("AUTH_API_KEY").filter(|v| !v.trim().is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.tts_endpoints.is_empty() {
            return Err(ConfigError::InvalidVar {
                var: "TTS_ENDPOINTS",
                reason: "at least one endpoint URL is required".to_string(),
            });
        }
        for url in &self.tts_endpoints {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidVar {
                    var: "TTS_ENDPOINTS",
                    reason: format!("'{url}' is not an http(s) URL"),
                });
            }
        }
        if self.tts_max_concurrent_per_endpoint == 0 {
            return Err(ConfigError::InvalidVar {
                var: "TTS_MAX_CONCURRENT_PER_ENDPOINT",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.segment_min_len == 0 || self.segment_min_len > self.segment_max_len {
            return Err(ConfigError::InvalidVar {
                var: "SEGMENT_MIN_LEN",
                reason: format!(
                    "min length {} must be in 1..={}",
                    self.segment_min_len, self.segment_max_len
                ),
            });
        }
        Ok(())
    }

    /// Socket address string for the listener.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn newapi_timeout(&self) -> Duration {
        Duration::from_secs(self.newapi_timeout_secs)
    }

    pub fn newapi_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.newapi_idle_timeout_secs)
    }

    pub fn tts_request_timeout(&self) -> Duration {
        Duration::from_secs(self.tts_request_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
