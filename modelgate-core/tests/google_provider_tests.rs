//! Integration tests for the Gemini adapter against a mock HTTP server

use modelgate_core::config::ProviderSettings;
use modelgate_core::protocol::{ChunkKind, CompletionRequest, Message, ProviderKind, StreamChunk};
use modelgate_core::providers::retry::RetryPolicy;
use modelgate_core::providers::{GoogleAdapter, ProviderAdapter, ProviderError};
use serde_json::json;
use std::sync::Mutex;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn adapter_for(server: &MockServer) -> GoogleAdapter {
    GoogleAdapter::new(&ProviderSettings::new("g-test").with_base_url(server.uri()))
        .unwrap()
        .with_retry_policy(RetryPolicy::fast())
}

fn generate_body(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": "STOP"
        }],
        "usageMetadata": {
            "promptTokenCount": 8,
            "candidatesTokenCount": 5,
            "totalTokenCount": 13
        }
    })
}

#[tokio::test]
async fn test_generate_authenticates_via_query_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-pro:generateContent"))
        .and(query_param("key", "g-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generate_body("Hello there")))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = adapter_for(&server);
    let request = CompletionRequest::from_prompt("gemini-pro", "Say hello");
    let response = adapter.generate(&request).await.unwrap();

    assert_eq!(response.provider, ProviderKind::Google);
    assert_eq!(response.content, "Hello there");
    assert_eq!(response.usage.prompt_tokens, 8);
    assert_eq!(response.usage.completion_tokens, 5);
    assert_eq!(response.metadata.get("finish_reason"), Some(&json!("STOP")));
}

#[tokio::test]
async fn test_system_prompt_routes_to_system_instruction() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-pro:generateContent"))
        .and(body_partial_json(json!({
            "systemInstruction": {"parts": [{"text": "Be terse"}]},
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(generate_body("ok")))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = adapter_for(&server);
    let request = CompletionRequest::from_messages("gemini-pro", vec![Message::user("hi")])
        .with_system_prompt("Be terse");
    adapter.generate(&request).await.unwrap();
}

#[tokio::test]
async fn test_missing_usage_falls_back_to_estimation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "12345678"}]},
                "finishReason": "STOP"
            }]
        })))
        .mount(&server)
        .await;

    let adapter = adapter_for(&server);
    let request = CompletionRequest::from_prompt("gemini-pro", "12345678");
    let response = adapter.generate(&request).await.unwrap();

    // 8 chars at 4 chars per token, both sides
    assert_eq!(response.usage.prompt_tokens, 2);
    assert_eq!(response.usage.completion_tokens, 2);
    assert_eq!(response.usage.total_tokens, 4);
}

#[tokio::test]
async fn test_resource_exhausted_retries_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-pro:generateContent"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED"}
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generate_body("recovered")))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = adapter_for(&server);
    let request = CompletionRequest::from_prompt("gemini-pro", "hi");
    let response = adapter.generate(&request).await.unwrap();
    assert_eq!(response.content, "recovered");
}

#[tokio::test]
async fn test_simulated_stream_rechunks_full_completion() {
    let server = MockServer::start().await;

    // Longer than one chunk so the fallback has to split
    let long_text = "x".repeat(150);
    Mock::given(method("POST"))
        .and(path("/models/gemini-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generate_body(&long_text)))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = adapter_for(&server);
    let request = CompletionRequest::from_prompt("gemini-pro", "go");

    let chunks: Mutex<Vec<StreamChunk>> = Mutex::new(Vec::new());
    let sink = |chunk: StreamChunk| chunks.lock().unwrap().push(chunk);
    let response = adapter
        .generate_stream(&request, "stream-g", &sink)
        .await
        .unwrap();

    assert_eq!(response.content, long_text);

    let chunks = chunks.into_inner().unwrap();
    // 150 chars at 64 per chunk: three deltas plus the terminal chunk
    assert_eq!(chunks.len(), 4);
    let collected: String = chunks.iter().filter_map(|c| c.text.as_deref()).collect();
    assert_eq!(collected, long_text);
    assert_eq!(chunks.iter().filter(|c| c.is_final).count(), 1);
    let last = chunks.last().unwrap();
    assert!(last.is_final);
    assert_eq!(last.kind, ChunkKind::ContentDelta);
    assert!(last.metadata.contains_key("usage"));
}

#[tokio::test]
async fn test_stream_failure_emits_terminal_error_chunk() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-pro:generateContent"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "message": "Invalid argument", "status": "INVALID_ARGUMENT"}
        })))
        .mount(&server)
        .await;

    let adapter = adapter_for(&server);
    let request = CompletionRequest::from_prompt("gemini-pro", "hi");

    let chunks: Mutex<Vec<StreamChunk>> = Mutex::new(Vec::new());
    let sink = |chunk: StreamChunk| chunks.lock().unwrap().push(chunk);
    let result = adapter.generate_stream(&request, "stream-h", &sink).await;

    assert!(matches!(result, Err(ProviderError::Api { .. })));
    let chunks = chunks.into_inner().unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].kind, ChunkKind::Error);
    assert!(chunks[0].is_final);
    assert!(chunks[0].error.is_some());
}
