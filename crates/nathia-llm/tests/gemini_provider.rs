//! HTTP-level tests for the Gemini and Claude providers using wiremock.

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use nathia_llm::{
    ClaudeProvider, GeminiProvider, GenerateRequest, LlmError, LlmProvider, RetryPolicy, RetryingProvider,
};

fn gemini(mock_server: &MockServer) -> GeminiProvider {
    GeminiProvider::new("test-api-key", "gemini-2.5-flash")
        .unwrap()
        .with_base_url(mock_server.uri())
        .with_timeout(Duration::from_secs(5))
        .unwrap()
}

fn text_body(text: &str) -> serde_json::Value {
    serde_json::json!({
        "candidates": [{
            "content": { "parts": [{ "text": text }], "role": "model" },
            "finishReason": "STOP"
        }]
    })
}

#[tokio::test]
async fn gemini_returns_candidate_text() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash-exp:generateContent"))
        .and(query_param("key", "test-api-key"))
        .and(body_partial_json(serde_json::json!({
            "systemInstruction": { "parts": [{ "text": "Seja acolhedora." }] },
            "generationConfig": { "maxOutputTokens": 800 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_body("  Oi, tudo bem?  ")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = GenerateRequest::new("Estou cansada").with_system("Seja acolhedora.");
    let text = gemini(&mock_server).generate(&request).await.unwrap();
    assert_eq!(text, "Oi, tudo bem?");
}

#[tokio::test]
async fn gemini_alias_and_exp_name_hit_the_same_endpoint() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash-exp:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_body("ok")))
        .expect(2)
        .mount(&mock_server)
        .await;

    let provider = gemini(&mock_server);
    provider.generate(&GenerateRequest::new("a").with_model("gemini-2.5-flash")).await.unwrap();
    provider.generate(&GenerateRequest::new("b").with_model("gemini-2.5-flash-exp")).await.unwrap();
}

#[tokio::test]
async fn gemini_unknown_model_fails_without_a_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_body("never")))
        .expect(0)
        .mount(&mock_server)
        .await;

    let err = gemini(&mock_server)
        .generate(&GenerateRequest::new("x").with_model("foo-bar"))
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::UnknownModel(_)));
}

#[test]
fn gemini_constructor_rejects_unknown_default_model() {
    assert!(matches!(
        GeminiProvider::new("key", "gpt-4"),
        Err(LlmError::UnknownModel(_))
    ));
}

#[tokio::test]
async fn gemini_rate_limit_carries_retry_after() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
        .mount(&mock_server)
        .await;

    let err = gemini(&mock_server).generate(&GenerateRequest::new("x")).await.unwrap_err();
    assert!(matches!(err, LlmError::RateLimited { retry_after: Some(3) }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn gemini_auth_failure_is_permanent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let err = gemini(&mock_server).generate(&GenerateRequest::new("x")).await.unwrap_err();
    assert!(matches!(err, LlmError::Authentication(_)));
    assert!(!err.is_retryable());
    assert!(!err.to_string().contains("test-api-key"));
}

#[tokio::test]
async fn gemini_blocked_prompt_is_content_filtered() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        })))
        .mount(&mock_server)
        .await;

    let err = gemini(&mock_server).generate(&GenerateRequest::new("x")).await.unwrap_err();
    assert!(matches!(err, LlmError::ContentFiltered(_)));
}

#[tokio::test]
async fn gemini_empty_candidates_is_invalid_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "candidates": [] })))
        .mount(&mock_server)
        .await;

    let err = gemini(&mock_server).generate(&GenerateRequest::new("x")).await.unwrap_err();
    assert!(matches!(err, LlmError::InvalidResponse(_)));
}

#[tokio::test]
async fn retrying_gemini_falls_back_after_server_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash-exp:generateContent"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash-exp:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_body("do fallback")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let policy = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    };
    let provider = RetryingProvider::new(Arc::new(gemini(&mock_server)), policy)
        .with_fallback_model("gemini-2.0-flash-exp");

    let text = provider.generate(&GenerateRequest::new("x")).await.unwrap();
    assert_eq!(text, "do fallback");
}

#[tokio::test]
async fn claude_sends_version_header_and_reads_text_block() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "claude-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [{ "type": "text", "text": "{\"level\": 2}" }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = ClaudeProvider::new("claude-key", "claude-test")
        .unwrap()
        .with_base_url(mock_server.uri());

    let text = provider.generate(&GenerateRequest::new("analise")).await.unwrap();
    assert_eq!(text, "{\"level\": 2}");
}
