use uuid::Uuid;

/// Failures surfaced by the conversation store, the exchange coordinator and
/// the image relay.
#[derive(thiserror::Error, Debug)]
pub enum ChatError {
    #[error("API key is required; add one in settings.")]
    MissingCredential,
    #[error("no chat is selected")]
    NoActiveChat,
    #[error("message is empty")]
    EmptyMessage,
    #[error("chat {0} not found")]
    ChatNotFound(Uuid),
    #[error("message {0} not found")]
    MessageNotFound(Uuid),
    #[error("message index {index} is out of range for a chat of {len} messages")]
    InvalidMessageIndex { index: usize, len: usize },
    #[error("upstream request failed: {0}")]
    UpstreamRequest(String),
    #[error("failed to fetch image: {0}")]
    UpstreamFetch(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("image upload failed: {0}")]
    Upload(String),
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChatError {
    /// Whether the caller should send the user to the settings prompt.
    pub fn prompts_for_settings(&self) -> bool {
        matches!(self, Self::MissingCredential | Self::NoActiveChat)
    }

    /// True when the exchange target disappeared while a response was in flight.
    pub fn is_orphaned(&self) -> bool {
        matches!(self, Self::ChatNotFound(_) | Self::MessageNotFound(_))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        Self::UpstreamRequest(err.to_string())
    }
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;
