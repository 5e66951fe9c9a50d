use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::anyhow;
use axum::Router;
use clap::Parser;
use http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    Method,
};
use tokio::net::TcpListener;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use overtone_gateway::{routes, AppState, ServerConfig};

/// Overtone Gateway - chat proxy with speculative TTS prefetch
#[derive(Parser, Debug)]
#[command(name = "overtone-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a .env file to load before reading configuration
    #[arg(short = 'e', long = "env-file", value_name = "FILE")]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load .env before config (must happen before any env reads)
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .map_err(|e| anyhow!("failed to load {}: {}", path.display(), e))?;
        }
        None => {
            let _ = dotenvy::dotenv();
        }
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "overtone_gateway=info,tower_http=info".into()),
        )
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;

    info!(
        llm_upstream = %config.newapi_base_url,
        backends = config.tts_endpoints.len(),
        tokens = config.tts_api_tokens.len(),
        auth = config.auth_api_key.is_some(),
        "starting overtone gateway"
    );

    let address = config.address();
    let rate_limit_rps = config.rate_limit_rps;
    let rate_limit_burst = config.rate_limit_burst;
    let cors_origins = config.cors_allowed_origins.clone();

    // Create application state (spawns the cache sweeper)
    let app_state = AppState::new(config);

    // Configure rate limiting (disabled when rate >= 100000 for load testing)
    let governor_layer = if rate_limit_rps < 100_000 {
        let governor_config = GovernorConfigBuilder::default()
            .per_second(rate_limit_rps as u64)
            .burst_size(rate_limit_burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .expect("failed to build rate limiter config");
        Some(GovernorLayer {
            config: std::sync::Arc::new(governor_config),
        })
    } else {
        info!("rate limiting disabled (rate >= 100000/s)");
        None
    };

    // Configure CORS
    let cors_layer = if let Some(ref origins) = cors_origins {
        if origins == "*" {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_credentials(false)
        } else {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_credentials(true)
        }
    } else {
        // No CORS configured - same-origin only
        info!("CORS not configured, defaulting to same-origin only");
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE])
            .allow_credentials(false)
    };

    let app: Router = routes::build_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .layer(tower::util::option_layer(governor_layer));

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("invalid server address '{}': {}", address, e))?;

    info!("server listening on http://{}", socket_addr);

    let listener = TcpListener::bind(&socket_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
