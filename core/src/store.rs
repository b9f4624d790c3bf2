use crate::error::ChatResult;
use crate::state::{ChatMessage, ChatState, MessageRole, DEFAULT_SYSTEM_PROMPT};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const STATE_KEY: &str = "parley-client-state";
pub const THEME_KEY: &str = "theme";

/// String-keyed durable slots.
pub trait KeyValueSlots: Send + Sync {
    fn read(&self, key: &str) -> ChatResult<Option<String>>;
    fn write(&self, key: &str, value: &str) -> ChatResult<()>;
    fn remove(&self, key: &str) -> ChatResult<()>;
}

/// One file per key under a data directory.
#[derive(Clone, Debug)]
pub struct FileSlots {
    root: PathBuf,
}

impl FileSlots {
    pub fn new(root: PathBuf) -> Self {
        fs::create_dir_all(&root).ok();
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl KeyValueSlots for FileSlots {
    fn read(&self, key: &str) -> ChatResult<Option<String>> {
        match fs::read_to_string(self.slot_path(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> ChatResult<()> {
        let path = self.slot_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, value)?;
        fs::rename(&staging, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> ChatResult<()> {
        match fs::remove_file(self.slot_path(key)) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Default)]
pub struct MemorySlots {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl MemorySlots {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueSlots for MemorySlots {
    fn read(&self, key: &str) -> ChatResult<Option<String>> {
        Ok(self.inner.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> ChatResult<()> {
        self.inner.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ChatResult<()> {
        self.inner.lock().remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThemePreference {
    Light,
    Dark,
    #[default]
    System,
}

impl ThemePreference {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "light" => Some(Self::Light),
            "dark" => Some(Self::Dark),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Serializes the whole [`ChatState`] into a single slot.
#[derive(Clone)]
pub struct StateStore {
    slots: Arc<dyn KeyValueSlots>,
}

impl StateStore {
    pub fn new(slots: Arc<dyn KeyValueSlots>) -> Self {
        Self { slots }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySlots::new()))
    }

    pub fn on_disk(root: PathBuf) -> Self {
        Self::new(Arc::new(FileSlots::new(root)))
    }

    /// Loads the persisted state. Missing data yields the empty state; corrupt
    /// data is set aside under `<key>.corrupt` and also yields the empty state.
    pub fn load_state(&self) -> ChatResult<ChatState> {
        let Some(raw) = self.slots.read(STATE_KEY)? else {
            return Ok(ChatState::default());
        };
        match serde_json::from_str::<ChatState>(&raw) {
            Ok(state) => Ok(sanitize(state)),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "persisted chat state is corrupt, starting from an empty state"
                );
                self.slots.write(&format!("{STATE_KEY}.corrupt"), &raw)?;
                Ok(ChatState::default())
            }
        }
    }

    pub fn save_state(&self, state: &ChatState) -> ChatResult<()> {
        let serialized = serde_json::to_string(state)?;
        self.slots.write(STATE_KEY, &serialized)
    }

    pub fn load_theme(&self) -> ChatResult<ThemePreference> {
        Ok(self
            .slots
            .read(THEME_KEY)?
            .and_then(|raw| ThemePreference::parse(&raw))
            .unwrap_or_default())
    }

    pub fn save_theme(&self, theme: ThemePreference) -> ChatResult<()> {
        self.slots.write(THEME_KEY, theme.as_str())
    }
}

/// Drops a dangling selection and restores a missing leading system message.
fn sanitize(mut state: ChatState) -> ChatState {
    if let Some(id) = state.current_chat_id {
        if state.chat(id).is_none() {
            state.current_chat_id = None;
        }
    }
    for chat in &mut state.chats {
        let leads_with_system = chat
            .messages
            .first()
            .is_some_and(|message| message.role == MessageRole::System);
        if !leads_with_system {
            tracing::warn!(chat_id = %chat.id, "restoring missing system message");
            chat.messages.insert(0, ChatMessage::system(DEFAULT_SYSTEM_PROMPT));
        }
    }
    state
}
