//! OpenAI-compatible backend against a mock HTTP server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use maestro_agent::{
    CompletionBackend, CompletionClient, LlmProvider, ModelConfig, OpenAiBackend, StreamCallbacks,
};
use maestro_core::{MaestroError, Message};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> ModelConfig {
    ModelConfig {
        provider: LlmProvider::OpenAi,
        model_id: "test-model".to_string(),
        api_key: "sk-test".to_string(),
        api_base_url: Some(server.uri()),
        temperature: 0.2,
        max_tokens: 256,
        fallback_models: Vec::new(),
        retry_policy: None,
    }
}

#[tokio::test]
async fn test_complete_returns_assistant_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({"model": "test-model"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "decomposed"}, "finish_reason": "stop"}]
        })))
        .mount(&server)
        .await;

    let backend = OpenAiBackend::new(config_for(&server));
    let text = backend
        .complete(&[Message::system("plan"), Message::user("goal")])
        .await
        .unwrap();
    assert_eq!(text, "decomposed");
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({"error": "busy"})))
        .mount(&server)
        .await;

    let backend = OpenAiBackend::new(config_for(&server));
    let err = backend.complete(&[Message::user("goal")]).await.unwrap_err();
    assert!(matches!(err, MaestroError::Http(_)));
    assert!(err.is_transient(), "503 should be retryable: {err}");
}

#[tokio::test]
async fn test_stream_delivers_tokens() {
    let server = MockServer::start().await;
    let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n\
               data: {\"choices\":[{\"delta\":{\"content\":\", world\"}}]}\n\n\
               data: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse),
        )
        .mount(&server)
        .await;

    let client = CompletionClient::from_backend(
        Arc::new(OpenAiBackend::new(config_for(&server))),
        Duration::from_secs(5),
    );
    let tokens = Arc::new(Mutex::new(Vec::new()));
    let sink = tokens.clone();
    let text = client
        .stream(
            &[Message::user("greet")],
            StreamCallbacks::new().on_token(move |t| sink.lock().unwrap().push(t.to_string())),
        )
        .await
        .unwrap();

    assert_eq!(text, "Hello, world");
    assert_eq!(tokens.lock().unwrap().len(), 2);
}
