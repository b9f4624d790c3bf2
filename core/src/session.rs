use crate::config::RuntimeSettings;
use crate::error::{ChatError, ChatResult};
use crate::state::{Chat, ChatModel, ChatState, ImageModel, DEFAULT_SYSTEM_PROMPT, NEW_CHAT_TITLE};
use crate::store::{StateStore, ThemePreference};
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

/// Shared owner of the current [`ChatState`] snapshot.
///
/// Every transition runs against the latest snapshot under the write lock and
/// is persisted before the lock is released, so the durable copy always
/// matches the last applied snapshot.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<RwLock<ChatState>>,
    store: StateStore,
    system_prompt: Arc<str>,
}

impl AppState {
    /// Rehydrates from `store`.
    pub fn load(store: StateStore) -> ChatResult<Self> {
        let state = store.load_state()?;
        tracing::debug!(chats = state.chats.len(), "rehydrated chat state");
        Ok(Self::with_state(store, state))
    }

    /// Opens the store under the configured data directory. The configured
    /// credential only seeds an empty slot; a stored key is kept.
    pub fn open(settings: &RuntimeSettings) -> ChatResult<Self> {
        let state = Self::load(StateStore::on_disk(settings.data_dir.clone()))?
            .with_system_prompt(settings.system_prompt.clone());
        if !state.snapshot().has_credential() {
            if let Some(api_key) = &settings.api_key {
                state.set_api_key(Some(api_key.clone()));
            }
        }
        Ok(state)
    }

    pub fn with_state(store: StateStore, state: ChatState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
            store,
            system_prompt: Arc::from(DEFAULT_SYSTEM_PROMPT),
        }
    }

    pub fn in_memory() -> Self {
        Self::with_state(StateStore::in_memory(), ChatState::default())
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt: String = prompt.into();
        self.system_prompt = Arc::from(prompt);
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn snapshot(&self) -> ChatState {
        self.inner.read().clone()
    }

    pub fn current_chat(&self) -> Option<Chat> {
        self.inner.read().current_chat().cloned()
    }

    pub fn chat(&self, id: Uuid) -> Option<Chat> {
        self.inner.read().chat(id).cloned()
    }

    /// Replaces the snapshot with `transition(current)`. A failed transition
    /// leaves the snapshot untouched.
    pub fn apply<F>(&self, transition: F) -> ChatResult<()>
    where
        F: FnOnce(&ChatState) -> ChatResult<ChatState>,
    {
        let mut guard = self.inner.write();
        let next = transition(&*guard)?;
        if let Err(err) = self.store.save_state(&next) {
            tracing::warn!(%err, "failed to persist chat state");
        }
        *guard = next;
        Ok(())
    }

    pub fn set_api_key(&self, api_key: Option<String>) {
        let _ = self.apply(|s| Ok(s.with_api_key(api_key)));
    }

    /// Creates a chat, selects it and returns its id.
    pub fn create_chat(&self) -> ChatResult<Uuid> {
        self.create_chat_titled(NEW_CHAT_TITLE)
    }

    pub fn create_chat_titled(&self, title: &str) -> ChatResult<Uuid> {
        let mut created = None;
        self.apply(|s| {
            let next = s.create_chat_with_prompt(title, &self.system_prompt)?;
            created = next.current_chat_id;
            Ok(next)
        })?;
        created.ok_or(ChatError::NoActiveChat)
    }

    pub fn select_chat(&self, id: Uuid) {
        let _ = self.apply(|s| Ok(s.select_chat(id)));
    }

    pub fn remove_chat(&self, id: Uuid) {
        let _ = self.apply(|s| Ok(s.remove_chat(id)));
    }

    pub fn set_model(&self, chat_id: Uuid, model: ChatModel) -> ChatResult<()> {
        self.apply(|s| s.set_model(chat_id, model))
    }

    pub fn set_image_model(&self, chat_id: Uuid, image_model: ImageModel) -> ChatResult<()> {
        self.apply(|s| s.set_image_model(chat_id, image_model))
    }

    pub fn theme(&self) -> ThemePreference {
        self.store.load_theme().unwrap_or_else(|err| {
            tracing::warn!(%err, "failed to read theme preference");
            ThemePreference::default()
        })
    }

    pub fn set_theme(&self, theme: ThemePreference) -> ChatResult<()> {
        self.store.save_theme(theme)
    }
}
