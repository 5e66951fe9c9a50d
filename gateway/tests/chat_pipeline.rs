//! End-to-end chat pipeline tests against mock upstreams
//!
//! Verifies the temporal-overlap contract: SSE events pass through
//! byte-exact while sentences are prefetched into the TTS cache during the
//! stream, so a follow-up speech request is served from cache.

mod mock_upstreams;

use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use mock_upstreams::{
    sse_chat_body, spawn_app, spawn_llm, spawn_stalling_llm, spawn_tts, test_config, MockTts,
    WAV_BYTES,
};
use overtone_gateway::{routes, AppState};

async fn spawn_gateway(llm_url: &str, tts_urls: &str, extra: &[(&str, &str)]) -> String {
    let config = test_config(llm_url, tts_urls, extra);
    let state = AppState::new(config);
    spawn_app(routes::build_router(state)).await
}

#[tokio::test]
async fn sse_stream_passes_through_byte_exact() {
    let sse_body = sse_chat_body("gpt-test", &["Sent", "ence one. Sen", "tence two."]);
    let llm_url = spawn_llm(sse_body.clone()).await;
    let tts = MockTts::ok(Duration::from_millis(50));
    let tts_url = spawn_tts(tts.clone()).await;
    let gateway = spawn_gateway(&llm_url, &tts_url, &[]).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{gateway}/v1/chat/completions"))
        .json(&json!({
            "model": "gpt-test",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let relayed = response.text().await.unwrap();
    assert_eq!(relayed, sse_body);
}

#[tokio::test]
async fn stream_prefetches_sentences_into_cache() {
    let sse_body = sse_chat_body("gpt-test", &["Sent", "ence one. Sen", "tence two."]);
    let llm_url = spawn_llm(sse_body).await;
    let tts = MockTts::ok(Duration::from_millis(300));
    let tts_url = spawn_tts(tts.clone()).await;
    let gateway = spawn_gateway(&llm_url, &tts_url, &[]).await;

    let client = reqwest::Client::new();
    client
        .post(format!("{gateway}/v1/chat/completions"))
        .json(&json!({"model": "gpt-test", "messages": [], "stream": true}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    // Both sentences were submitted during the stream
    let stats: serde_json::Value = client
        .get(format!("{gateway}/cache/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(stats["size"].as_u64().unwrap() >= 2, "stats: {stats}");

    // Give synthesis time to land, then the speech request is a cache hit
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(tts.hits(), 2);

    let started = Instant::now();
    let response = client
        .post(format!("{gateway}/v1/audio/speech"))
        .json(&json!({"model": "default", "input": "Sentence one."}))
        .send()
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "audio/wav"
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), WAV_BYTES);
    assert!(elapsed < Duration::from_millis(100), "took {elapsed:?}");
    assert_eq!(tts.hits(), 2, "cache hit must not synthesize again");
}

#[tokio::test]
async fn non_stream_client_gets_assembled_response_with_live_prefetch() {
    let sse_body = sse_chat_body("gpt-test", &["Hello there. ", "General greeting."]);
    let llm_url = spawn_llm(sse_body).await;
    let tts = MockTts::ok(Duration::from_millis(20));
    let tts_url = spawn_tts(tts.clone()).await;
    let gateway = spawn_gateway(&llm_url, &tts_url, &[]).await;

    let client = reqwest::Client::new();
    let response: serde_json::Value = client
        .post(format!("{gateway}/v1/chat/completions"))
        .json(&json!({"model": "gpt-test", "messages": [], "stream": false}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(response["object"], "chat.completion");
    assert_eq!(response["id"], "chatcmpl-test");
    assert_eq!(response["model"], "gpt-test");
    assert_eq!(
        response["choices"][0]["message"]["content"],
        "Hello there. General greeting."
    );
    assert_eq!(response["choices"][0]["message"]["role"], "assistant");

    // Prefetch ran even though the client asked for a non-stream response
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(tts.hits(), 2);
}

#[tokio::test]
async fn tts_disabled_skips_prefetch() {
    let sse_body = sse_chat_body("gpt-test", &["One sentence here. Another one."]);
    let llm_url = spawn_llm(sse_body.clone()).await;
    let tts = MockTts::ok(Duration::ZERO);
    let tts_url = spawn_tts(tts.clone()).await;
    let gateway = spawn_gateway(&llm_url, &tts_url, &[]).await;

    let client = reqwest::Client::new();
    let relayed = client
        .post(format!("{gateway}/v1/chat/completions"))
        .json(&json!({
            "model": "gpt-test",
            "messages": [],
            "stream": true,
            "tts_enabled": false,
        }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    // Passthrough unaffected, no synthesis dispatched
    assert_eq!(relayed, sse_body);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(tts.hits(), 0);
}

#[tokio::test]
async fn idle_timeout_relays_partial_event_before_terminal_error() {
    // One data line without its blank-line delimiter: an incomplete event
    let partial =
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hal\"},\"finish_reason\":null}]}\n";
    let llm_url = spawn_stalling_llm(partial.to_string()).await;
    let tts = MockTts::ok(Duration::ZERO);
    let tts_url = spawn_tts(tts).await;
    let gateway = spawn_gateway(&llm_url, &tts_url, &[("NEWAPI_IDLE_TIMEOUT", "1")]).await;

    let relayed = reqwest::Client::new()
        .post(format!("{gateway}/v1/chat/completions"))
        .json(&json!({"model": "gpt-test", "messages": [], "stream": true}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    // The buffered partial event reaches the client before the stream ends
    assert!(relayed.starts_with(partial), "relayed: {relayed:?}");
    assert!(relayed.contains("upstream_error"));
    assert!(relayed.ends_with("data: [DONE]\n\n"));
}

#[tokio::test]
async fn unreachable_llm_upstream_maps_to_502_for_non_stream() {
    let tts = MockTts::ok(Duration::ZERO);
    let tts_url = spawn_tts(tts).await;
    // Point at a closed port
    let gateway = spawn_gateway("http://127.0.0.1:9", &tts_url, &[]).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{gateway}/v1/chat/completions"))
        .json(&json!({"model": "x", "messages": [], "stream": false}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "upstream_error");
}
