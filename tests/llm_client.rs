//! Chat-completion client tests against a `wiremock` server.

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sqlchat::config::LlmConfig;
use sqlchat::error::{is_context_overflow, SqlChatError};
use sqlchat::llm::{ChatCompletionClient, Generator};

fn client(base: &str, retries: u32) -> ChatCompletionClient {
    let config = LlmConfig {
        max_retries: retries,
        timeout_secs: 5,
        ..LlmConfig::default()
    };
    ChatCompletionClient::new(&format!("{}/v1", base), "test-key", "test-model", 64, &config)
        .expect("client")
}

fn completion(content: &str) -> serde_json::Value {
    json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
}

#[tokio::test]
async fn test_completion_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"model": "test-model", "max_tokens": 64})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("  SELECT 1;\n")))
        .expect(1)
        .mount(&server)
        .await;

    let text = client(&server.uri(), 0).complete("count rows").await.unwrap();
    assert_eq!(text, "SELECT 1;");
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("query")))
        .mount(&server)
        .await;

    let text = client(&server.uri(), 1).complete("classify").await.unwrap();
    assert_eq!(text, "query");
}

#[tokio::test]
async fn test_context_length_error_is_overflow() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "This model's maximum context length is 8193 tokens"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server.uri(), 3).complete("huge").await.unwrap_err();
    assert!(is_context_overflow(&err));
}

#[tokio::test]
async fn test_other_client_error_is_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server.uri(), 3).complete("hi").await.unwrap_err();
    assert!(!is_context_overflow(&err));
    match err.downcast_ref::<SqlChatError>() {
        Some(SqlChatError::Provider { status, .. }) => assert_eq!(*status, 401),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_choices_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "x"})))
        .mount(&server)
        .await;

    let err = client(&server.uri(), 0).complete("hi").await.unwrap_err();
    assert!(err.to_string().contains("missing choices"));
}
