pub mod config;
pub mod error;
pub mod exchange;
pub mod llm;
pub mod relay;
pub mod session;
pub mod state;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod llm_streaming_test;
#[cfg(test)]
mod test_support;

pub use config::{ConfigError, ImageKitSettings, RuntimeSettings};
pub use error::{ChatError, ChatResult};
pub use exchange::{ExchangeCoordinator, ExchangeOutcome, ExchangeReport};
pub use llm::{ApiMessage, LanguageModelProvider, LlmDriver, LlmProviderKind, MockProvider};
pub use relay::{ImageHost, ImageKitHost, ImageRelay, ImageUploader, MemoryImageHost, RelayClient};
pub use session::AppState;
pub use state::{
    Chat, ChatMessage, ChatModel, ChatState, ImageModel, MessageKind, MessagePatch, MessageRole,
};
pub use store::{FileSlots, KeyValueSlots, MemorySlots, StateStore, ThemePreference};
