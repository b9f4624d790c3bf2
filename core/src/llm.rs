use crate::error::{ChatError, ChatResult};
use crate::state::{ChatMessage, ChatModel, ImageModel, MessageRole};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const IMAGE_TOOL_NAME: &str = "generate_image";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LlmProviderKind {
    OpenAi,
    Mock,
}

impl LlmProviderKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Some(Self::OpenAi),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }
}

/// Role and content only; the shape sent to the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ApiMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

impl From<&ChatMessage> for ApiMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub delta: String,
    pub done: bool,
}

impl StreamChunk {
    pub fn delta(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            delta: String::new(),
            done: true,
        }
    }
}

pub type ChunkReceiver = mpsc::UnboundedReceiver<ChatResult<StreamChunk>>;

#[async_trait]
pub trait LanguageModelProvider: Send + Sync {
    async fn stream_chat(
        &self,
        api_key: &str,
        messages: &[ApiMessage],
        model: ChatModel,
    ) -> ChatResult<ChunkReceiver>;

    async fn complete_chat(
        &self,
        api_key: &str,
        messages: &[ApiMessage],
        model: ChatModel,
    ) -> ChatResult<ApiMessage>;

    /// Asks the chat model to turn the conversation into an image prompt.
    async fn image_prompt(
        &self,
        api_key: &str,
        messages: &[ApiMessage],
        model: ChatModel,
    ) -> ChatResult<Option<String>>;

    /// Returns the provider's (temporary) URL of the generated image.
    async fn generate_image(
        &self,
        api_key: &str,
        prompt: &str,
        model: ImageModel,
    ) -> ChatResult<String>;
}

#[derive(Clone)]
pub struct LlmDriver {
    kind: LlmProviderKind,
    provider: Arc<dyn LanguageModelProvider>,
}

impl LlmDriver {
    pub fn new(kind: LlmProviderKind, provider: Arc<dyn LanguageModelProvider>) -> Self {
        Self { kind, provider }
    }

    pub fn with_provider(kind: LlmProviderKind, base_url: Option<String>) -> Self {
        match kind {
            LlmProviderKind::OpenAi => Self::new(
                kind,
                Arc::new(OpenAiProvider::new(
                    base_url.unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                )),
            ),
            LlmProviderKind::Mock => Self::new(kind, Arc::new(MockProvider::default())),
        }
    }

    pub fn fake() -> Self {
        Self::with_provider(LlmProviderKind::Mock, None)
    }

    pub fn provider_kind(&self) -> LlmProviderKind {
        self.kind
    }

    pub async fn stream_chat(
        &self,
        api_key: &str,
        messages: &[ApiMessage],
        model: ChatModel,
    ) -> ChatResult<ChunkReceiver> {
        self.provider.stream_chat(api_key, messages, model).await
    }

    pub async fn complete_chat(
        &self,
        api_key: &str,
        messages: &[ApiMessage],
        model: ChatModel,
    ) -> ChatResult<ApiMessage> {
        self.provider.complete_chat(api_key, messages, model).await
    }

    /// Falls back to `fallback` when the model does not produce a prompt.
    pub async fn image_prompt(
        &self,
        api_key: &str,
        messages: &[ApiMessage],
        model: ChatModel,
        fallback: &str,
    ) -> ChatResult<String> {
        let prompt = self.provider.image_prompt(api_key, messages, model).await?;
        Ok(prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| fallback.to_string()))
    }

    pub async fn generate_image(
        &self,
        api_key: &str,
        prompt: &str,
        model: ImageModel,
    ) -> ChatResult<String> {
        self.provider.generate_image(api_key, prompt, model).await
    }
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post_completion(
        &self,
        api_key: &str,
        request: &CompletionRequest<'_>,
    ) -> ChatResult<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await?;
        ensure_success(response).await
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Deserialize)]
struct ToolCall {
    function: ToolFunction,
}

#[derive(Deserialize)]
struct ToolFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    prompt: &'a str,
    model: &'a str,
    n: u8,
    size: &'a str,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
}

#[async_trait]
impl LanguageModelProvider for OpenAiProvider {
    async fn stream_chat(
        &self,
        api_key: &str,
        messages: &[ApiMessage],
        model: ChatModel,
    ) -> ChatResult<ChunkReceiver> {
        let request = CompletionRequest {
            model: model.api_name(),
            messages,
            stream: true,
            tools: None,
            tool_choice: None,
        };
        let response = self.post_completion(api_key, &request).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        let _ = tx.send(Err(err.into()));
                        return;
                    }
                };
                buffer.extend_from_slice(&bytes);
                while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&line);
                    match parse_sse_line(line.trim()) {
                        SseLine::Delta(delta) => {
                            if tx.send(Ok(StreamChunk::delta(delta))).is_err() {
                                return;
                            }
                        }
                        SseLine::Done => {
                            let _ = tx.send(Ok(StreamChunk::done()));
                            return;
                        }
                        SseLine::Error(message) => {
                            let _ = tx.send(Err(ChatError::UpstreamRequest(message)));
                            return;
                        }
                        SseLine::Skip => {}
                    }
                }
            }
            let _ = tx.send(Ok(StreamChunk::done()));
        });

        Ok(rx)
    }

    async fn complete_chat(
        &self,
        api_key: &str,
        messages: &[ApiMessage],
        model: ChatModel,
    ) -> ChatResult<ApiMessage> {
        let request = CompletionRequest {
            model: model.api_name(),
            messages,
            stream: false,
            tools: None,
            tool_choice: None,
        };
        let response: CompletionResponse =
            self.post_completion(api_key, &request).await?.json().await?;
        let message = first_message(response)?;
        Ok(ApiMessage {
            role: MessageRole::Assistant,
            content: message.content.unwrap_or_default(),
        })
    }

    async fn image_prompt(
        &self,
        api_key: &str,
        messages: &[ApiMessage],
        model: ChatModel,
    ) -> ChatResult<Option<String>> {
        let request = CompletionRequest {
            model: model.api_name(),
            messages,
            stream: false,
            tools: Some(image_tool_definition()),
            tool_choice: Some(json!({
                "type": "function",
                "function": { "name": IMAGE_TOOL_NAME }
            })),
        };
        let response: CompletionResponse =
            self.post_completion(api_key, &request).await?.json().await?;
        let message = first_message(response)?;
        Ok(message
            .tool_calls
            .into_iter()
            .find(|call| call.function.name == IMAGE_TOOL_NAME)
            .and_then(|call| prompt_from_arguments(&call.function.arguments)))
    }

    async fn generate_image(
        &self,
        api_key: &str,
        prompt: &str,
        model: ImageModel,
    ) -> ChatResult<String> {
        let request = ImageRequest {
            prompt,
            model: model.api_name(),
            n: 1,
            size: model.image_size(),
        };
        let response = self
            .client
            .post(self.endpoint("images/generations"))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;
        let response: ImageResponse = ensure_success(response).await?.json().await?;
        response
            .data
            .into_iter()
            .find_map(|image| image.url)
            .ok_or_else(|| ChatError::UpstreamRequest("image response carried no url".into()))
    }
}

fn image_tool_definition() -> Value {
    json!([{
        "type": "function",
        "function": {
            "name": IMAGE_TOOL_NAME,
            "description": "Generates an image based on the conversation",
            "parameters": {
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "The prompt for the image generation"
                    }
                },
                "required": ["prompt"]
            }
        }
    }])
}

fn prompt_from_arguments(arguments: &str) -> Option<String> {
    let value: Value = serde_json::from_str(arguments).ok()?;
    value
        .get("prompt")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

fn first_message(response: CompletionResponse) -> ChatResult<CompletionMessage> {
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| ChatError::UpstreamRequest("completion carried no choices".into()))
}

async fn ensure_success(response: reqwest::Response) -> ChatResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let summary = summarize_error(&body).unwrap_or_else(|| body.trim().to_string());
    Err(ChatError::UpstreamRequest(format!("{status}: {summary}")))
}

#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Delta(String),
    Done,
    Error(String),
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(payload) = line.strip_prefix("data:").map(str::trim_start) else {
        return SseLine::Skip;
    };
    if payload == "[DONE]" {
        return SseLine::Done;
    }
    if payload.is_empty() {
        return SseLine::Skip;
    }
    match serde_json::from_str::<StreamResponse>(payload) {
        Ok(response) => response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map_or(SseLine::Skip, SseLine::Delta),
        Err(_) => SseLine::Error(summarize_error(payload).unwrap_or_else(|| payload.to_string())),
    }
}

fn summarize_error(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body.trim()).ok()?;
    let text = value
        .pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| value.get("error").and_then(Value::as_str))
        .or_else(|| value.get("message").and_then(Value::as_str))?;
    Some(text.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// In-process provider with scripted output.
#[derive(Clone, Default)]
pub struct MockProvider {
    deltas: Option<Vec<String>>,
    image_prompt: Option<String>,
    image_url: Option<String>,
    fail: bool,
    requests: Arc<Mutex<Vec<Vec<ApiMessage>>>>,
}

impl MockProvider {
    pub const IMAGE_URL: &'static str = "https://images.mock.invalid/generated.png";

    pub fn with_deltas<I, S>(mut self, deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deltas = Some(deltas.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_image_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.image_prompt = Some(prompt.into());
        self
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Every message history the provider has been asked about, in order.
    pub fn requests(&self) -> Vec<Vec<ApiMessage>> {
        self.requests.lock().clone()
    }

    fn record(&self, messages: &[ApiMessage]) -> ChatResult<()> {
        self.requests.lock().push(messages.to_vec());
        if self.fail {
            return Err(ChatError::UpstreamRequest("mock provider failure".into()));
        }
        Ok(())
    }

    fn reply(&self, messages: &[ApiMessage], model: ChatModel) -> Vec<String> {
        if let Some(deltas) = &self.deltas {
            return deltas.clone();
        }
        let prompt = messages
            .iter()
            .rev()
            .find(|msg| msg.role == MessageRole::User)
            .map(|msg| msg.content.as_str())
            .unwrap_or("How can I help you today?");
        format!("[Mock] {}: received '{}'.", model.api_name(), prompt)
            .split_inclusive(' ')
            .map(str::to_owned)
            .collect()
    }
}

#[async_trait]
impl LanguageModelProvider for MockProvider {
    async fn stream_chat(
        &self,
        _api_key: &str,
        messages: &[ApiMessage],
        model: ChatModel,
    ) -> ChatResult<ChunkReceiver> {
        self.record(messages)?;
        let (tx, rx) = mpsc::unbounded_channel();
        for delta in self.reply(messages, model) {
            let _ = tx.send(Ok(StreamChunk::delta(delta)));
        }
        let _ = tx.send(Ok(StreamChunk::done()));
        Ok(rx)
    }

    async fn complete_chat(
        &self,
        _api_key: &str,
        messages: &[ApiMessage],
        model: ChatModel,
    ) -> ChatResult<ApiMessage> {
        self.record(messages)?;
        Ok(ApiMessage {
            role: MessageRole::Assistant,
            content: self.reply(messages, model).concat(),
        })
    }

    async fn image_prompt(
        &self,
        _api_key: &str,
        messages: &[ApiMessage],
        _model: ChatModel,
    ) -> ChatResult<Option<String>> {
        self.record(messages)?;
        Ok(self.image_prompt.clone())
    }

    async fn generate_image(
        &self,
        _api_key: &str,
        _prompt: &str,
        _model: ImageModel,
    ) -> ChatResult<String> {
        if self.fail {
            return Err(ChatError::UpstreamRequest("mock provider failure".into()));
        }
        Ok(self
            .image_url
            .clone()
            .unwrap_or_else(|| Self::IMAGE_URL.to_string()))
    }
}
