use parley_core::relay::ImageRelay;
use parley_core::store::STATE_KEY;
use parley_core::{
    AppState, ChatModel, ExchangeCoordinator, ExchangeOutcome, FileSlots, KeyValueSlots,
    LlmDriver, MemoryImageHost, MessageKind, MessageRole, StateStore, ThemePreference,
};
use std::sync::Arc;
use tempfile::TempDir;

fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn coordinator(state: AppState) -> ExchangeCoordinator {
    let relay = ImageRelay::new(Arc::new(MemoryImageHost::default()));
    ExchangeCoordinator::new(state, LlmDriver::fake(), Arc::new(relay))
}

#[test]
fn app_state_survives_restart() {
    let runtime = test_runtime();
    let temp_dir = TempDir::new().expect("temp dir");

    let chat_id = {
        let state = AppState::load(StateStore::on_disk(temp_dir.path().to_path_buf()))
            .expect("load");
        state.set_api_key(Some("sk-restart".into()));
        let chat_id = state.create_chat().expect("chat");
        state.set_model(chat_id, ChatModel::Economy).expect("model");
        let report = runtime
            .block_on(coordinator(state).send("hello world", MessageKind::Text))
            .expect("send message");
        assert_eq!(report.outcome, ExchangeOutcome::Completed);
        chat_id
    };

    let restored = AppState::load(StateStore::on_disk(temp_dir.path().to_path_buf()))
        .expect("reload");
    let snapshot = restored.snapshot();
    assert_eq!(snapshot.api_key.as_deref(), Some("sk-restart"));
    assert_eq!(snapshot.current_chat_id, Some(chat_id));

    let chat = restored.current_chat().expect("chat");
    assert_eq!(chat.title, "hello world");
    assert_eq!(chat.model, ChatModel::Economy);
    assert_eq!(chat.messages.len(), 3);
    assert_eq!(chat.messages[2].role, MessageRole::Assistant);
    assert!(chat.messages[2].content.contains("gpt-4o-mini"));
}

#[test]
fn persisted_document_uses_client_keys() {
    let temp_dir = TempDir::new().expect("temp dir");
    let slots = FileSlots::new(temp_dir.path().to_path_buf());
    let state = AppState::load(StateStore::new(Arc::new(slots.clone()))).expect("load");
    state.set_api_key(Some("sk".into()));
    state.create_chat().expect("chat");

    let raw = slots.read(STATE_KEY).expect("read").expect("persisted");
    for key in ["\"chats\"", "\"currentChatId\"", "\"apiKey\"", "\"imageModel\"", "\"createdAt\""] {
        assert!(raw.contains(key), "missing {key} in {raw}");
    }
    assert!(raw.contains("\"gpt-4o\""));
    assert!(raw.contains("\"dall-e-3\""));
}

#[test]
fn corrupt_state_falls_back_to_empty_and_is_kept_aside() {
    let temp_dir = TempDir::new().expect("temp dir");
    let slots = FileSlots::new(temp_dir.path().to_path_buf());
    slots.write(STATE_KEY, "{ not json").expect("seed");

    let state = AppState::load(StateStore::new(Arc::new(slots.clone()))).expect("load");
    assert!(state.snapshot().chats.is_empty());
    assert_eq!(state.snapshot().api_key, None);

    let backup = slots
        .read(&format!("{STATE_KEY}.corrupt"))
        .expect("read backup")
        .expect("backup written");
    assert_eq!(backup, "{ not json");
}

#[test]
fn edit_and_delete_flows_persist() {
    let runtime = test_runtime();
    let temp_dir = TempDir::new().expect("temp dir");
    let store = StateStore::on_disk(temp_dir.path().to_path_buf());
    let state = AppState::load(store.clone()).expect("load");
    state.set_api_key(Some("sk".into()));
    state.create_chat().expect("chat");
    let exchange = coordinator(state.clone());

    runtime.block_on(async {
        exchange.send("one", MessageKind::Text).await.expect("one");
        exchange.send("two", MessageKind::Text).await.expect("two");
        exchange.send("three", MessageKind::Text).await.expect("three");
    });
    exchange.delete_pair(3).expect("delete two");
    runtime
        .block_on(exchange.edit(1, "uno", MessageKind::Text))
        .expect("edit");

    let persisted = store.load_state().expect("reload");
    let chat = persisted.current_chat().expect("chat");
    let contents: Vec<&str> = chat.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents.len(), 3);
    assert_eq!(contents[1], "uno");
    assert!(contents[2].contains("uno"));
    assert_eq!(chat.title, "uno");
}

#[test]
fn removing_current_chat_clears_selection_on_disk() {
    let temp_dir = TempDir::new().expect("temp dir");
    let store = StateStore::on_disk(temp_dir.path().to_path_buf());
    let state = AppState::load(store.clone()).expect("load");
    state.set_api_key(Some("sk".into()));
    let first = state.create_chat().expect("first");
    let second = state.create_chat().expect("second");

    state.remove_chat(second);
    let persisted = store.load_state().expect("reload");
    assert_eq!(persisted.current_chat_id, None);
    assert_eq!(persisted.chats.len(), 1);
    assert_eq!(persisted.chats[0].id, first);

    state.select_chat(first);
    assert_eq!(store.load_state().expect("reload").current_chat_id, Some(first));
}

#[test]
fn theme_is_stored_beside_chat_state() {
    let temp_dir = TempDir::new().expect("temp dir");
    let state = AppState::load(StateStore::on_disk(temp_dir.path().to_path_buf())).expect("load");
    state.set_theme(ThemePreference::Dark).expect("theme");

    let restored = AppState::load(StateStore::on_disk(temp_dir.path().to_path_buf())).expect("load");
    assert_eq!(restored.theme(), ThemePreference::Dark);
    assert!(restored.snapshot().chats.is_empty());
}

#[test]
fn failed_image_exchange_persists_error_text() {
    let runtime = test_runtime();
    let temp_dir = TempDir::new().expect("temp dir");
    let store = StateStore::on_disk(temp_dir.path().to_path_buf());
    let state = AppState::load(store.clone()).expect("load");
    state.set_api_key(Some("sk".into()));
    state.create_chat().expect("chat");

    let relay = ImageRelay::new(Arc::new(MemoryImageHost::default().failing()));
    let exchange = ExchangeCoordinator::new(state, LlmDriver::fake(), Arc::new(relay));
    let report = runtime
        .block_on(exchange.send("a lighthouse", MessageKind::Image))
        .expect("send");
    assert!(matches!(report.outcome, ExchangeOutcome::Failed(_)));

    let persisted = store.load_state().expect("reload");
    let reply = persisted
        .current_chat()
        .and_then(|chat| chat.message(report.placeholder_id))
        .expect("placeholder");
    assert_eq!(reply.content, parley_core::state::EXCHANGE_ERROR_TEXT);
    assert_eq!(reply.image_url, None);
    assert_eq!(reply.kind, Some(MessageKind::Image));
}
