use bulletin::llm::remote::RemoteLlmProvider;
use bulletin::llm::{LlmProvider, LlmRequest};

fn request(prompt: &str, timeout_seconds: Option<u64>) -> LlmRequest {
    LlmRequest {
        model: "openai/gpt-4o-mini".to_string(),
        system: Some("Eres un editor de noticias.".to_string()),
        prompt: prompt.to_string(),
        max_tokens: Some(100),
        temperature: Some(0.3),
        timeout_seconds,
    }
}

#[tokio::test]
async fn test_remote_provider_with_mock() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .match_header("authorization", "Bearer fake-api-key")
        .match_body(mockito::Matcher::PartialJsonString(
            r#"{"model": "openai/gpt-4o-mini", "messages": [{"role": "system", "content": "Eres un editor de noticias."}, {"role": "user", "content": "Resume esto"}]}"#
                .to_string(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "model": "openai/gpt-4o-mini",
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "Resumen de prueba"
                    },
                    "finish_reason": "stop"
                }],
                "usage": {
                    "prompt_tokens": 10,
                    "completion_tokens": 5,
                    "total_tokens": 15
                }
            }"#,
        )
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key");

    let result = provider.generate(request("Resume esto", Some(10))).await;

    assert!(result.is_ok());
    let response = result.unwrap();
    assert_eq!(response.content, "Resumen de prueba");
    assert_eq!(response.usage.prompt_tokens, 10);
    assert_eq!(response.usage.total_tokens, 15);
    assert_eq!(response.model, "openai/gpt-4o-mini");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_provider_without_usage() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices": [{"message": {"role": "assistant", "content": "hola"}}]}"#)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key");
    let response = provider.generate(request("Hola", None)).await.unwrap();

    assert_eq!(response.content, "hola");
    assert_eq!(response.usage.total_tokens, 0);
    assert_eq!(response.model, "openai/gpt-4o-mini");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_provider_error_handling() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": {"message": "Rate limit exceeded"}}"#)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key");

    let result = provider.generate(request("Test", None)).await;

    assert!(result.is_err());
    let err = result.unwrap_err();
    assert!(err.to_string().contains("429"));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_provider_timeout() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(std::time::Duration::from_secs(3));
            w.write_all(b"too late")
        })
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key");

    let result = provider.generate(request("Test", Some(1))).await;

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("timed out"));
}
