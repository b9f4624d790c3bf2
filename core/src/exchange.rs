use crate::config::{ConfigError, RuntimeSettings};
use crate::error::{ChatError, ChatResult};
use crate::llm::{ApiMessage, LlmDriver};
use crate::relay::{ImageKitHost, ImageRelay, ImageUploader, RelayClient};
use crate::session::AppState;
use crate::state::{ChatModel, ImageModel, MessageKind, MessagePatch, MessageRole};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Completed,
    /// The placeholder now holds the fixed error text.
    Failed(String),
    /// The chat or placeholder vanished before the response finished.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeReport {
    pub chat_id: Uuid,
    pub placeholder_id: Uuid,
    pub outcome: ExchangeOutcome,
}

/// Drives one provider request per send or edit and folds the response into
/// the session state.
#[derive(Clone)]
pub struct ExchangeCoordinator {
    state: AppState,
    llm: LlmDriver,
    uploader: Arc<dyn ImageUploader>,
    streaming: bool,
}

struct Exchange {
    api_key: String,
    chat_id: Uuid,
    placeholder_id: Uuid,
    kind: MessageKind,
    model: ChatModel,
    image_model: ImageModel,
}

impl ExchangeCoordinator {
    pub fn new(state: AppState, llm: LlmDriver, uploader: Arc<dyn ImageUploader>) -> Self {
        Self {
            state,
            llm,
            uploader,
            streaming: true,
        }
    }

    /// A configured relay endpoint wins over in-process relaying to ImageKit.
    pub fn from_settings(state: AppState, settings: &RuntimeSettings) -> Result<Self, ConfigError> {
        let uploader: Arc<dyn ImageUploader> = match (&settings.relay_endpoint, &settings.imagekit) {
            (Some(endpoint), _) => Arc::new(RelayClient::new(endpoint.clone())),
            (None, Some(imagekit)) => {
                Arc::new(ImageRelay::new(Arc::new(ImageKitHost::new(imagekit))))
            }
            (None, None) => {
                return Err(ConfigError::Invalid(
                    "image uploads need server.relay_endpoint or ImageKit credentials".into(),
                ))
            }
        };
        let llm = LlmDriver::with_provider(settings.provider, Some(settings.openai_base_url.clone()));
        Ok(Self::new(state, llm, uploader).with_streaming(settings.streaming))
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Single-shot mode writes the reply once instead of per delta.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub async fn send(&self, content: &str, kind: MessageKind) -> ChatResult<ExchangeReport> {
        let (api_key, chat_id) = self.preconditions(content)?;
        self.run(api_key, chat_id, content, kind, None).await
    }

    /// Discards the user message at `index` and everything after it, then
    /// sends `content` in its place.
    pub async fn edit(
        &self,
        index: usize,
        content: &str,
        kind: MessageKind,
    ) -> ChatResult<ExchangeReport> {
        let (api_key, chat_id) = self.preconditions(content)?;
        let chat = self
            .state
            .chat(chat_id)
            .ok_or(ChatError::ChatNotFound(chat_id))?;
        let len = chat.messages.len();
        let is_user_message = chat
            .messages
            .get(index)
            .is_some_and(|m| m.role == MessageRole::User);
        if index == 0 || !is_user_message {
            return Err(ChatError::InvalidMessageIndex { index, len });
        }
        self.state.apply(|s| s.truncate_after(chat_id, index))?;
        self.run(api_key, chat_id, content, kind, Some(index)).await
    }

    /// Removes the exchange starting at `index` from the current chat.
    pub fn delete_pair(&self, index: usize) -> ChatResult<()> {
        let chat_id = self
            .state
            .snapshot()
            .current_chat_id
            .ok_or(ChatError::NoActiveChat)?;
        self.state.apply(|s| s.delete_pair(chat_id, index))
    }

    fn preconditions(&self, content: &str) -> ChatResult<(String, Uuid)> {
        let snapshot = self.state.snapshot();
        let api_key = snapshot
            .credential()
            .ok_or(ChatError::MissingCredential)?
            .to_string();
        let chat_id = snapshot
            .current_chat()
            .map(|chat| chat.id)
            .ok_or(ChatError::NoActiveChat)?;
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        Ok((api_key, chat_id))
    }

    async fn run(
        &self,
        api_key: String,
        chat_id: Uuid,
        content: &str,
        kind: MessageKind,
        insert_at: Option<usize>,
    ) -> ChatResult<ExchangeReport> {
        let chat = self
            .state
            .chat(chat_id)
            .ok_or(ChatError::ChatNotFound(chat_id))?;
        let len = chat.messages.len();
        let at = insert_at.map_or(len, |index| index.max(1).min(len));
        let mut history: Vec<ApiMessage> =
            chat.messages[..at].iter().map(ApiMessage::from).collect();
        history.push(ApiMessage::user(content));

        let placeholder_id = Uuid::new_v4();
        self.state.apply(|s| {
            s.append_user_and_placeholder(chat_id, placeholder_id, content, kind, insert_at)
        })?;
        tracing::debug!(%chat_id, %placeholder_id, ?kind, "exchange started");

        let exchange = Exchange {
            api_key,
            chat_id,
            placeholder_id,
            kind,
            model: chat.model,
            image_model: chat.image_model,
        };
        let result = match kind {
            MessageKind::Text if self.streaming => self.stream_text(&exchange, &history).await,
            MessageKind::Text => self.complete_text(&exchange, &history).await,
            MessageKind::Image => self.generate_image(&exchange, &history, content).await,
        };

        let outcome = match result {
            Ok(()) => ExchangeOutcome::Completed,
            Err(err) if err.is_orphaned() => {
                tracing::debug!(%chat_id, %placeholder_id, "exchange target removed mid-flight");
                ExchangeOutcome::Abandoned
            }
            Err(err) => {
                tracing::warn!(%err, %chat_id, "exchange failed");
                match self.update(&exchange, MessagePatch::failure(kind)) {
                    Ok(()) => ExchangeOutcome::Failed(err.to_string()),
                    Err(_) => ExchangeOutcome::Abandoned,
                }
            }
        };
        tracing::debug!(%chat_id, %placeholder_id, ?outcome, "exchange finished");

        Ok(ExchangeReport {
            chat_id,
            placeholder_id,
            outcome,
        })
    }

    async fn stream_text(&self, exchange: &Exchange, history: &[ApiMessage]) -> ChatResult<()> {
        let mut stream = self
            .llm
            .stream_chat(&exchange.api_key, history, exchange.model)
            .await?;
        let mut streamed = String::new();
        while let Some(chunk) = stream.recv().await {
            let chunk = chunk?;
            if chunk.done {
                break;
            }
            if chunk.delta.is_empty() {
                continue;
            }
            streamed.push_str(&chunk.delta);
            self.update(exchange, MessagePatch::content(streamed.as_str(), exchange.kind))?;
        }
        Ok(())
    }

    async fn complete_text(&self, exchange: &Exchange, history: &[ApiMessage]) -> ChatResult<()> {
        let reply = self
            .llm
            .complete_chat(&exchange.api_key, history, exchange.model)
            .await?;
        self.update(exchange, MessagePatch::content(reply.content, exchange.kind))
    }

    async fn generate_image(
        &self,
        exchange: &Exchange,
        history: &[ApiMessage],
        content: &str,
    ) -> ChatResult<()> {
        let prompt = self
            .llm
            .image_prompt(&exchange.api_key, history, exchange.model, content)
            .await?;
        let source = self
            .llm
            .generate_image(&exchange.api_key, &prompt, exchange.image_model)
            .await?;
        let hosted = self.uploader.rehost(&source).await?;
        self.update(exchange, MessagePatch::image(hosted))
    }

    fn update(&self, exchange: &Exchange, patch: MessagePatch) -> ChatResult<()> {
        self.state.apply(|s| {
            s.update_assistant_message(exchange.chat_id, exchange.placeholder_id, patch)
        })
    }
}
