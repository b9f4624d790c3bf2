#[cfg(test)]
mod streaming_tests {
    use crate::error::ChatError;
    use crate::llm::{ApiMessage, ChunkReceiver, LlmDriver, LlmProviderKind, OpenAiProvider};
    use crate::state::{ChatModel, ImageModel, MessageRole};
    use crate::test_support::serve_once;
    use std::sync::Arc;

    async fn drain(mut stream: ChunkReceiver) -> Result<(String, usize), ChatError> {
        let mut accumulated = String::new();
        let mut chunk_count = 0;
        while let Some(result) = stream.recv().await {
            let chunk = result?;
            if chunk.done {
                return Ok((accumulated, chunk_count));
            }
            accumulated.push_str(&chunk.delta);
            chunk_count += 1;
        }
        panic!("stream closed without a done chunk");
    }

    fn openai_driver(origin: String) -> LlmDriver {
        LlmDriver::new(
            LlmProviderKind::OpenAi,
            Arc::new(OpenAiProvider::new(format!("{origin}/v1"))),
        )
    }

    #[tokio::test]
    async fn test_mock_provider_streaming() {
        let driver = LlmDriver::fake();
        let messages = vec![ApiMessage::user("Hello, can you help me?")];

        let stream = driver
            .stream_chat("key", &messages, ChatModel::Primary)
            .await
            .expect("Failed to start streaming");
        let (accumulated, chunk_count) = drain(stream).await.expect("stream");

        assert!(chunk_count > 1, "Should receive several chunks");
        assert!(accumulated.contains("Mock"), "Mock response should contain 'Mock'");
        assert!(accumulated.contains("Hello, can you help me?"));
    }

    #[tokio::test]
    async fn test_streaming_with_empty_history() {
        let driver = LlmDriver::fake();
        let stream = driver
            .stream_chat("key", &[], ChatModel::Economy)
            .await
            .expect("Failed to start streaming");
        let (accumulated, _) = drain(stream).await.expect("stream");
        assert!(accumulated.contains("gpt-4o-mini"));
    }

    #[tokio::test]
    async fn openai_provider_streams_sse_deltas() {
        let body = [
            r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
            "",
            r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#,
            "data: [DONE]",
            "",
        ]
        .join("\n");
        let (base_url, request) = serve_once("200 OK", "text/event-stream", body).await;

        let stream = openai_driver(base_url)
            .stream_chat("sk-live", &[ApiMessage::user("hi")], ChatModel::Primary)
            .await
            .expect("stream");
        let (accumulated, chunk_count) = drain(stream).await.expect("drain");
        assert_eq!(accumulated, "Hello");
        assert_eq!(chunk_count, 2);

        let request = request.await.expect("request");
        assert!(request.starts_with("POST /v1/chat/completions"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer sk-live"));
        assert!(request.contains(r#""stream":true"#));
        assert!(request.contains(r#""model":"gpt-4o""#));
    }

    #[tokio::test]
    async fn openai_provider_surfaces_error_status() {
        let body = r#"{"error":{"message":"Incorrect API key provided"}}"#;
        let (base_url, _request) =
            serve_once("401 Unauthorized", "application/json", body).await;

        let err = openai_driver(base_url)
            .stream_chat("bad", &[ApiMessage::user("hi")], ChatModel::Primary)
            .await
            .expect_err("unauthorized");
        match err {
            ChatError::UpstreamRequest(message) => {
                assert!(message.contains("401"), "{message}");
                assert!(message.contains("Incorrect API key provided"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn openai_provider_completes_single_shot() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Hi there"}}]}"#;
        let (base_url, request) =
            serve_once("200 OK", "application/json", body).await;

        let reply = openai_driver(base_url)
            .complete_chat("key", &[ApiMessage::user("hi")], ChatModel::Economy)
            .await
            .expect("completion");
        assert_eq!(reply.role, MessageRole::Assistant);
        assert_eq!(reply.content, "Hi there");
        let request = request.await.expect("request");
        assert!(request.contains(r#""stream":false"#));
        assert!(request.contains(r#""model":"gpt-4o-mini""#));
    }

    #[tokio::test]
    async fn openai_provider_reads_image_prompt_tool_call() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null,"tool_calls":[{"id":"call_1","type":"function","function":{"name":"generate_image","arguments":"{\"prompt\":\"a sleepy cat\"}"}}]}}]}"#;
        let (base_url, request) =
            serve_once("200 OK", "application/json", body).await;

        let prompt = openai_driver(base_url)
            .image_prompt("key", &[ApiMessage::user("a cat")], ChatModel::Primary, "a cat")
            .await
            .expect("prompt");
        assert_eq!(prompt, "a sleepy cat");
        let request = request.await.expect("request");
        assert!(request.contains(r#""tool_choice""#));
        assert!(request.contains("generate_image"));
    }

    #[tokio::test]
    async fn openai_provider_generates_image_with_model_size() {
        let body = r#"{"created":1,"data":[{"url":"https://provider/img.png"}]}"#;
        let (base_url, request) =
            serve_once("200 OK", "application/json", body).await;

        let url = openai_driver(base_url)
            .generate_image("key", "a cat", ImageModel::V2)
            .await
            .expect("image");
        assert_eq!(url, "https://provider/img.png");
        let request = request.await.expect("request");
        assert!(request.starts_with("POST /v1/images/generations"));
        assert!(request.contains(r#""size":"512x512""#));
        assert!(request.contains(r#""model":"dall-e-2""#));
        assert!(request.contains(r#""n":1"#));
    }
}
