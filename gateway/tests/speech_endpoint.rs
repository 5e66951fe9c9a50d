//! Speech endpoint, dispatcher failover, and auth tests against mock
//! backends.

mod mock_upstreams;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use mock_upstreams::{spawn_app, spawn_llm, spawn_tts, test_config, MockTts, WAV_BYTES};
use overtone_gateway::{routes, AppState};

async fn spawn_gateway(tts_urls: &str, extra: &[(&str, &str)]) -> String {
    // The LLM upstream is unused by these tests but required by config
    let llm_url = spawn_llm(String::new()).await;
    let config = test_config(&llm_url, tts_urls, extra);
    let state = AppState::new(config);
    spawn_app(routes::build_router(state)).await
}

#[tokio::test]
async fn concurrent_speech_requests_share_one_synthesis() {
    let tts = MockTts::ok(Duration::from_millis(300));
    let tts_url = spawn_tts(tts.clone()).await;
    let gateway = spawn_gateway(&tts_url, &[]).await;

    let client = reqwest::Client::new();
    let mut tasks = Vec::new();
    for _ in 0..20 {
        let client = client.clone();
        let url = format!("{gateway}/v1/audio/speech");
        tasks.push(tokio::spawn(async move {
            client
                .post(url)
                .json(&json!({"model": "default", "input": "hello world"}))
                .send()
                .await
                .unwrap()
                .bytes()
                .await
                .unwrap()
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap().as_ref(), WAV_BYTES);
    }
    assert_eq!(tts.hits(), 1, "single-flight must collapse concurrent gets");

    let stats: serde_json::Value = client
        .get(format!("{gateway}/cache/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["size"], 1);
}

#[tokio::test]
async fn empty_input_is_rejected() {
    let tts = MockTts::ok(Duration::ZERO);
    let tts_url = spawn_tts(tts.clone()).await;
    let gateway = spawn_gateway(&tts_url, &[]).await;

    let response = reqwest::Client::new()
        .post(format!("{gateway}/v1/audio/speech"))
        .json(&json!({"model": "default", "input": "   "}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    assert_eq!(tts.hits(), 0);
}

#[tokio::test]
async fn failover_retries_on_healthy_backend() {
    let bad = MockTts::failing(StatusCode::SERVICE_UNAVAILABLE);
    let good = MockTts::ok(Duration::ZERO);
    let bad_url = spawn_tts(bad.clone()).await;
    let good_url = spawn_tts(good.clone()).await;
    let gateway = spawn_gateway(&format!("{bad_url},{good_url}"), &[]).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{gateway}/v1/audio/speech"))
        .json(&json!({"model": "default", "input": "failover please"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.bytes().await.unwrap().as_ref(), WAV_BYTES);
    assert_eq!(bad.hits(), 1);
    assert_eq!(good.hits(), 1);

    // The failure is recorded against the first backend only
    let health: serde_json::Value = client
        .get(format!("{gateway}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let backends = health["backends"].as_array().unwrap();
    let failed = backends
        .iter()
        .find(|b| b["url"].as_str().unwrap() == bad_url)
        .unwrap();
    let healthy = backends
        .iter()
        .find(|b| b["url"].as_str().unwrap() == good_url)
        .unwrap();
    assert_eq!(failed["consecutive_failures"], 1);
    assert_eq!(healthy["consecutive_failures"], 0);
}

#[tokio::test]
async fn backend_4xx_fails_fast_without_retry() {
    let bad = MockTts::failing(StatusCode::BAD_REQUEST);
    let tts_url = spawn_tts(bad.clone()).await;
    let gateway = spawn_gateway(&tts_url, &[]).await;

    let response = reqwest::Client::new()
        .post(format!("{gateway}/v1/audio/speech"))
        .json(&json!({"model": "unknown-model", "input": "some text"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    assert_eq!(bad.hits(), 1, "4xx must not be retried");
}

#[tokio::test]
async fn exhausted_retries_map_to_502() {
    let bad = MockTts::failing(StatusCode::INTERNAL_SERVER_ERROR);
    let tts_url = spawn_tts(bad.clone()).await;
    let gateway = spawn_gateway(&tts_url, &[("TTS_RETRY_COUNT", "1")]).await;

    let response = reqwest::Client::new()
        .post(format!("{gateway}/v1/audio/speech"))
        .json(&json!({"model": "default", "input": "doomed"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    assert_eq!(bad.hits(), 2, "one attempt plus one retry");

    // Eager removal on failure: the entry is gone, a fresh request retries
    let response = reqwest::Client::new()
        .post(format!("{gateway}/v1/audio/speech"))
        .json(&json!({"model": "default", "input": "doomed"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    assert_eq!(bad.hits(), 4);
}

#[tokio::test]
async fn bearer_auth_guards_v1_endpoints_only() {
    let tts = MockTts::ok(Duration::ZERO);
    let tts_url = spawn_tts(tts).await;
    let gateway = spawn_gateway(&tts_url, &[("AUTH_API_KEY", "sk-gateway-secret")]).await;

    let client = reqwest::Client::new();

    // Missing token
    let response = client
        .post(format!("{gateway}/v1/audio/speech"))
        .json(&json!({"model": "default", "input": "hi there"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Wrong token
    let response = client
        .post(format!("{gateway}/v1/audio/speech"))
        .bearer_auth("sk-wrong")
        .json(&json!({"model": "default", "input": "hi there"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Correct token
    let response = client
        .post(format!("{gateway}/v1/audio/speech"))
        .bearer_auth("sk-gateway-secret")
        .json(&json!({"model": "default", "input": "hi there"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Ops surface stays open
    for path in ["/health", "/cache/stats", "/v1/models", "/v1/audio/models", "/"] {
        let response = client
            .get(format!("{gateway}{path}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200, "{path} should be open");
    }
}

#[tokio::test]
async fn cache_clear_reports_dropped_entries() {
    let tts = MockTts::ok(Duration::ZERO);
    let tts_url = spawn_tts(tts.clone()).await;
    let gateway = spawn_gateway(&tts_url, &[]).await;

    let client = reqwest::Client::new();
    for input in ["first", "second"] {
        client
            .post(format!("{gateway}/v1/audio/speech"))
            .json(&json!({"model": "default", "input": input}))
            .send()
            .await
            .unwrap();
    }

    let cleared: serde_json::Value = client
        .post(format!("{gateway}/cache/clear"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cleared["cleared"], 2);

    // submit → clear → get synthesizes exactly once more
    let hits_before = tts.hits();
    client
        .post(format!("{gateway}/v1/audio/speech"))
        .json(&json!({"model": "default", "input": "first"}))
        .send()
        .await
        .unwrap();
    assert_eq!(tts.hits(), hits_before + 1);
}
