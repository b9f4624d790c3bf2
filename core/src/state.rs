use crate::error::{ChatError, ChatResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const NEW_CHAT_TITLE: &str = "New Chat";
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Be brief. Be concise. Be right.";
pub const IMAGE_CAPTION: &str = "Here's your generated image:";
pub const EXCHANGE_ERROR_TEXT: &str =
    "Sorry, there was an error processing your request. Please try again.";

const TITLE_MAX_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatModel {
    #[default]
    #[serde(rename = "gpt-4o")]
    Primary,
    #[serde(rename = "gpt-4o-mini")]
    Economy,
}

impl ChatModel {
    pub fn api_name(self) -> &'static str {
        match self {
            Self::Primary => "gpt-4o",
            Self::Economy => "gpt-4o-mini",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageModel {
    #[serde(rename = "dall-e-2")]
    V2,
    #[default]
    #[serde(rename = "dall-e-3")]
    V3,
}

impl ImageModel {
    pub fn api_name(self) -> &'static str {
        match self {
            Self::V2 => "dall-e-2",
            Self::V3 => "dall-e-3",
        }
    }

    pub fn image_size(self) -> &'static str {
        match self {
            Self::V2 => "512x512",
            Self::V3 => "1024x1024",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            image_url: None,
            id: None,
            kind: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::new(MessageRole::User, content)
        }
    }

    /// Empty assistant message that is filled in as the response arrives.
    pub fn placeholder(id: Uuid, kind: MessageKind) -> Self {
        Self {
            id: Some(id),
            kind: Some(kind),
            ..Self::new(MessageRole::Assistant, "")
        }
    }

    pub fn is_pending(&self) -> bool {
        self.role == MessageRole::Assistant && self.content.is_empty() && self.image_url.is_none()
    }
}

/// Partial update merged into a placeholder message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub kind: Option<MessageKind>,
}

impl MessagePatch {
    pub fn content(content: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            content: Some(content.into()),
            image_url: None,
            kind: Some(kind),
        }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self {
            content: Some(IMAGE_CAPTION.to_string()),
            image_url: Some(url.into()),
            kind: Some(MessageKind::Image),
        }
    }

    pub fn failure(kind: MessageKind) -> Self {
        Self::content(EXCHANGE_ERROR_TEXT, kind)
    }

    fn merge_into(self, message: &mut ChatMessage) {
        if let Some(content) = self.content {
            message.content = content;
        }
        if let Some(url) = self.image_url {
            message.image_url = Some(url);
        }
        if let Some(kind) = self.kind {
            message.kind = Some(kind);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: Uuid,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub model: ChatModel,
    #[serde(default)]
    pub image_model: ImageModel,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn new(title: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            messages: vec![ChatMessage::system(system_prompt)],
            model: ChatModel::default(),
            image_model: ImageModel::default(),
            created_at: Utc::now(),
        }
    }

    pub fn message_index(&self, id: Uuid) -> Option<usize> {
        self.messages.iter().position(|m| m.id == Some(id))
    }

    pub fn message(&self, id: Uuid) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == Some(id))
    }

    fn has_only_system_prompt(&self) -> bool {
        self.messages.len() == 1
    }
}

/// Root aggregate: every chat, the selection and the provider credential.
///
/// Each transition borrows the current snapshot and returns a new one; the
/// caller decides when to swap it in.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatState {
    #[serde(default)]
    pub chats: Vec<Chat>,
    #[serde(default)]
    pub current_chat_id: Option<Uuid>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl ChatState {
    pub fn has_credential(&self) -> bool {
        self.credential().is_some()
    }

    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.trim().is_empty())
    }

    pub fn chat(&self, id: Uuid) -> Option<&Chat> {
        self.chats.iter().find(|c| c.id == id)
    }

    pub fn current_chat(&self) -> Option<&Chat> {
        self.current_chat_id.and_then(|id| self.chat(id))
    }

    pub fn with_api_key(&self, api_key: Option<String>) -> Self {
        let mut next = self.clone();
        next.api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        next
    }

    pub fn create_chat(&self, title: &str) -> ChatResult<Self> {
        self.create_chat_with_prompt(title, DEFAULT_SYSTEM_PROMPT)
    }

    pub fn create_chat_with_prompt(&self, title: &str, system_prompt: &str) -> ChatResult<Self> {
        if !self.has_credential() {
            return Err(ChatError::MissingCredential);
        }
        let chat = Chat::new(title, system_prompt);
        let mut next = self.clone();
        next.current_chat_id = Some(chat.id);
        next.chats.insert(0, chat);
        Ok(next)
    }

    /// Unknown ids leave the selection untouched.
    pub fn select_chat(&self, id: Uuid) -> Self {
        let mut next = self.clone();
        if self.chat(id).is_some() {
            next.current_chat_id = Some(id);
        } else {
            tracing::debug!(%id, "ignoring selection of unknown chat");
        }
        next
    }

    pub fn remove_chat(&self, id: Uuid) -> Self {
        let mut next = self.clone();
        next.chats.retain(|c| c.id != id);
        if next.current_chat_id == Some(id) {
            next.current_chat_id = None;
        }
        next
    }

    /// Inserts a user message and its empty assistant placeholder, either at
    /// the end or at `insert_at` (never ahead of the system prompt).
    pub fn append_user_and_placeholder(
        &self,
        chat_id: Uuid,
        placeholder_id: Uuid,
        content: &str,
        kind: MessageKind,
        insert_at: Option<usize>,
    ) -> ChatResult<Self> {
        self.map_chat(chat_id, |chat| {
            if chat.has_only_system_prompt() {
                chat.title = derive_title(content);
            }
            let len = chat.messages.len();
            let at = insert_at.map_or(len, |index| index.max(1).min(len));
            chat.messages.insert(at, ChatMessage::user(content, kind));
            chat.messages
                .insert(at + 1, ChatMessage::placeholder(placeholder_id, kind));
            Ok(())
        })
    }

    pub fn update_assistant_message(
        &self,
        chat_id: Uuid,
        placeholder_id: Uuid,
        patch: MessagePatch,
    ) -> ChatResult<Self> {
        self.map_chat(chat_id, |chat| {
            let message = chat
                .messages
                .iter_mut()
                .find(|m| m.id == Some(placeholder_id))
                .ok_or(ChatError::MessageNotFound(placeholder_id))?;
            patch.merge_into(message);
            Ok(())
        })
    }

    /// Drops every message from `index` onward. The system prompt survives.
    pub fn truncate_after(&self, chat_id: Uuid, index: usize) -> ChatResult<Self> {
        self.map_chat(chat_id, |chat| {
            chat.messages.truncate(index.max(1));
            Ok(())
        })
    }

    /// Removes the message at `index` and the one after it.
    pub fn delete_pair(&self, chat_id: Uuid, index: usize) -> ChatResult<Self> {
        self.map_chat(chat_id, |chat| {
            let len = chat.messages.len();
            if index == 0 || index >= len.saturating_sub(1) {
                return Err(ChatError::InvalidMessageIndex { index, len });
            }
            chat.messages.drain(index..index + 2);
            Ok(())
        })
    }

    pub fn set_model(&self, chat_id: Uuid, model: ChatModel) -> ChatResult<Self> {
        self.map_chat(chat_id, |chat| {
            chat.model = model;
            Ok(())
        })
    }

    pub fn set_image_model(&self, chat_id: Uuid, image_model: ImageModel) -> ChatResult<Self> {
        self.map_chat(chat_id, |chat| {
            chat.image_model = image_model;
            Ok(())
        })
    }

    fn map_chat<F>(&self, chat_id: Uuid, f: F) -> ChatResult<Self>
    where
        F: FnOnce(&mut Chat) -> ChatResult<()>,
    {
        let mut next = self.clone();
        let chat = next
            .chats
            .iter_mut()
            .find(|c| c.id == chat_id)
            .ok_or(ChatError::ChatNotFound(chat_id))?;
        f(chat)?;
        Ok(next)
    }
}

fn derive_title(content: &str) -> String {
    content.chars().take(TITLE_MAX_CHARS).collect()
}
