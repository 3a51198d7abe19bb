use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::client::CompletionClient;
use super::memory::TurnCounter;
use super::notifier::{ChangeEvent, ChangeKind, ChangeNotifier, Subscription};
use super::render::{display_text, RenderRegexConfig};
use super::types::{ApiSettings, Channel, Contact, EngineState, Message, MessageQuery, Role};
use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};
use crate::storage_manager::lorebook::load_prompt_config;
use crate::storage_manager::personas::user_display_name;
use crate::storage_manager::settings::{load_api_config, save_api_config, ApiConfig};
use crate::storage_manager::{read_json_or_default, write_json, FileStore, KeyValueStore, ENGINE_STATE_KEY};
use crate::utils::new_id;

pub(crate) struct EngineInner {
    pub(crate) id: String,
    pub(crate) store: Arc<dyn KeyValueStore>,
    pub(crate) config: EngineConfig,
    pub(crate) client: CompletionClient,
    state: Mutex<EngineState>,
    notifier: ChangeNotifier,
    pub(crate) turns: TurnCounter,
}

/// Handle to one conversation engine. Cheap to clone; clones share state.
///
/// All state access goes through the methods here and in `commands`. The
/// state lock is never held across an await.
#[derive(Clone)]
pub struct ChatEngine {
    pub(crate) inner: Arc<EngineInner>,
}

fn load_state(store: &dyn KeyValueStore) -> EngineState {
    let mut state: EngineState = read_json_or_default(store, ENGINE_STATE_KEY);
    state.normalize();
    state
}

impl ChatEngine {
    /// Hydrates the engine state from `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, config: EngineConfig) -> AppResult<Self> {
        let client = CompletionClient::new(config.request_timeout_ms)?;
        let state = load_state(store.as_ref());
        let id = new_id();
        tracing::info!(
            instance = %id,
            contacts = state.contacts.len(),
            "engine hydrated"
        );
        Ok(Self {
            inner: Arc::new(EngineInner {
                id,
                store,
                turns: TurnCounter::new(config.summary_every),
                config,
                client,
                state: Mutex::new(state),
                notifier: ChangeNotifier::new(),
            }),
        })
    }

    /// Engine over a [`FileStore`] at `config.storage_dir`.
    pub fn open(config: EngineConfig) -> AppResult<Self> {
        let store = FileStore::open(&config.storage_dir)?;
        Self::new(Arc::new(store), config)
    }

    /// Origin tag attached to this engine's writes.
    pub fn instance_id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        self.inner.store.clone()
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&EngineState) -> R) -> R {
        f(&self.lock_state())
    }

    /// Applies `f`, flushes the whole state, then notifies `Save` outside
    /// the lock.
    pub(crate) fn mutate<R>(&self, contact_id: Option<&str>, f: impl FnOnce(&mut EngineState) -> R) -> R {
        let result = {
            let mut state = self.lock_state();
            let result = f(&mut state);
            self.flush(&state);
            result
        };
        self.emit(ChangeEvent::new(ChangeKind::Save, contact_id));
        result
    }

    fn flush(&self, state: &EngineState) {
        if let Err(e) = write_json(self.inner.store.as_ref(), ENGINE_STATE_KEY, state, &self.inner.id) {
            tracing::error!(error = %e, "failed to persist engine state");
        }
    }

    pub(crate) fn emit(&self, event: ChangeEvent) {
        self.inner.notifier.notify(&event);
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> EngineState {
        self.read(|state| state.clone())
    }

    pub fn list_contacts(&self) -> Vec<Contact> {
        self.read(|state| state.list_contacts().to_vec())
    }

    pub fn get_active_contact(&self) -> Option<Contact> {
        self.read(|state| {
            state
                .active_contact_id()
                .and_then(|id| state.contact(id))
                .cloned()
        })
    }

    pub fn active_contact_id(&self) -> Option<String> {
        self.read(|state| state.active_contact_id().map(str::to_string))
    }

    pub fn set_active_contact(&self, id: &str) -> bool {
        self.mutate(Some(id), |state| state.set_active_contact(id))
    }

    pub fn add_contact(&self, contact: Contact) -> bool {
        let id = contact.id.clone();
        self.mutate(Some(&id), |state| state.add_contact(contact))
    }

    /// Registers `defaults` and activates the first when nothing is active.
    pub fn ensure_default_contacts(&self, defaults: &[Contact]) -> usize {
        self.mutate(None, |state| state.merge_contacts(defaults))
    }

    /// Merges the contact list of the prompt config document.
    pub fn sync_contacts_from_prompt_config(&self) -> usize {
        let prompt = load_prompt_config(self.inner.store.as_ref());
        if prompt.contacts.is_empty() {
            return 0;
        }
        let added = self.mutate(None, |state| state.merge_contacts(&prompt.contacts));
        tracing::debug!(added, "contacts synced from prompt config");
        added
    }

    pub fn get_messages(&self, query: &MessageQuery) -> Vec<Message> {
        self.read(|state| state.messages_for(query.contact_id.as_deref(), query.channel.as_ref()))
    }

    pub fn get_message(&self, contact_id: &str, msg_id: &str) -> Option<Message> {
        self.read(|state| state.message(contact_id, msg_id).cloned())
    }

    pub fn append_message(
        &self,
        contact_id: &str,
        channel: &Channel,
        role: Role,
        content: &str,
        turn_id: Option<String>,
    ) -> Message {
        self.mutate(Some(contact_id), |state| {
            state.append_message(contact_id, channel, role, content, turn_id)
        })
    }

    pub fn update_message(&self, contact_id: &str, msg_id: &str, content: &str) -> bool {
        self.mutate(Some(contact_id), |state| state.update_message(contact_id, msg_id, content))
    }

    pub fn delete_message(&self, contact_id: &str, msg_id: &str) -> bool {
        self.mutate(Some(contact_id), |state| state.delete_message(contact_id, msg_id))
    }

    pub fn clear_messages(&self, contact_id: &str, channel: Option<&Channel>) {
        self.mutate(Some(contact_id), |state| state.clear_messages(contact_id, channel))
    }

    pub fn clear_all_messages(&self) {
        self.mutate(None, |state| state.clear_all_messages())
    }

    pub fn get_last_assistant_turn_id(&self, contact_id: &str, channel: &Channel) -> Option<String> {
        self.read(|state| state.last_assistant_turn_id(contact_id, channel))
    }

    pub fn is_last_turn(&self, contact_id: &str, channel: &Channel, turn_id: &str) -> bool {
        self.read(|state| state.is_last_turn(contact_id, channel, turn_id))
    }

    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.inner.notifier.subscribe(callback)
    }

    /// Replaces the in-memory state with the stored document. Unsaved
    /// changes of this engine are lost; the last full write wins.
    pub fn reload_from_storage(&self) {
        let fresh = load_state(self.inner.store.as_ref());
        let active = fresh.active_contact_id.clone();
        *self.lock_state() = fresh;
        tracing::debug!(instance = %self.inner.id, "state reloaded from storage");
        self.emit(ChangeEvent::new(ChangeKind::Reload, active.as_deref()));
    }

    /// Reloads whenever another engine writes the state document. Stops
    /// when the engine is dropped or the store's event channel closes.
    pub fn spawn_storage_watcher(&self) -> JoinHandle<()> {
        let mut events = self.inner.store.subscribe();
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let reload = match events.recv().await {
                    Ok(event) => {
                        let Some(inner) = weak.upgrade() else { break };
                        event.key == ENGINE_STATE_KEY && event.origin != inner.id
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "storage events lagged, reloading");
                        true
                    }
                    Err(RecvError::Closed) => break,
                };
                if !reload {
                    continue;
                }
                match weak.upgrade() {
                    Some(inner) => ChatEngine { inner }.reload_from_storage(),
                    None => break,
                }
            }
        })
    }

    /// Current API credentials, mirrored into the engine state's `api`
    /// block when they changed.
    pub fn api_config(&self) -> ApiConfig {
        let api = load_api_config(self.inner.store.as_ref());
        let mirrored = ApiSettings {
            base_url: api.base_url.clone(),
            api_key: api.api_key.clone(),
            model: api.model.clone(),
        };
        let changed = self.read(|state| state.api != mirrored);
        if changed {
            let mut state = self.lock_state();
            state.api = mirrored;
            self.flush(&state);
        }
        api
    }

    pub fn save_api_config(&self, config: &ApiConfig) -> AppResult<()> {
        save_api_config(self.inner.store.as_ref(), config, &self.inner.id)?;
        self.api_config();
        Ok(())
    }

    /// Model ids offered by the configured endpoint.
    pub async fn fetch_model_list(&self) -> AppResult<Vec<String>> {
        let api = self.api_config();
        self.inner
            .client
            .fetch_model_list(&api.base_url, &api.api_key, api.auth_style.as_ref())
            .await
    }

    pub async fn test_chat(&self) -> AppResult<String> {
        let api = self.api_config();
        self.inner.client.test_chat(&api).await
    }

    pub fn user_display_name(&self) -> String {
        user_display_name(self.inner.store.as_ref())
    }

    /// Message content as it should be shown, after display rules.
    pub fn display_text(&self, content: &str) -> String {
        let rules = RenderRegexConfig::load(self.inner.store.as_ref());
        display_text(content, &rules)
    }

    pub(crate) fn resolve_contact(&self, contact_id: Option<&str>) -> AppResult<String> {
        contact_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| self.active_contact_id())
            .ok_or_else(|| AppError::config("no contact selected"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_manager::contacts::default_contacts;
    use crate::storage_manager::lorebook::{save_prompt_config, PromptConfig};
    use crate::storage_manager::{read_json, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn engine_on(store: &MemoryStore) -> ChatEngine {
        ChatEngine::new(Arc::new(store.clone()), EngineConfig::default()).unwrap()
    }

    #[test]
    fn mutations_flush_and_notify() {
        let store = MemoryStore::new();
        let engine = engine_on(&store);
        let saves = Arc::new(AtomicUsize::new(0));
        let counter = saves.clone();
        let _sub = engine.on_change(move |event| {
            if event.kind == ChangeKind::Save {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let msg = engine.append_message("ybm", &Channel::main(), Role::User, "hi", None);
        assert!(engine.update_message("ybm", &msg.id, "hello"));
        assert!(!engine.update_message("ybm", "missing", "x"));
        assert_eq!(saves.load(Ordering::SeqCst), 3);

        let stored: EngineState = read_json(&store, ENGINE_STATE_KEY).unwrap().unwrap();
        assert_eq!(stored.messages["ybm"][0].content, "hello");
        assert!(stored.contacts.iter().any(|c| c.id == "ybm"));
    }

    #[test]
    fn state_survives_a_new_engine() {
        let store = MemoryStore::new();
        let first = engine_on(&store);
        first.ensure_default_contacts(&default_contacts());
        first.append_message("caishu", &Channel::phone(), Role::User, "在吗", None);

        let second = engine_on(&store);
        assert_eq!(second.get_active_contact().unwrap().name, "岩白眉");
        let query = MessageQuery {
            contact_id: Some("caishu".into()),
            channel: None,
        };
        assert_eq!(second.get_messages(&query).len(), 1);
        assert_ne!(first.instance_id(), second.instance_id());
    }

    #[test]
    fn clear_one_channel_keeps_the_other() {
        let store = MemoryStore::new();
        let engine = engine_on(&store);
        engine.append_message("ybm", &Channel::main(), Role::User, "m", None);
        engine.append_message("ybm", &Channel::phone(), Role::User, "p", None);

        engine.clear_messages("ybm", Some(&Channel::phone()));
        let left = engine.get_messages(&MessageQuery {
            contact_id: Some("ybm".into()),
            channel: None,
        });
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].content, "m");

        engine.clear_all_messages();
        assert!(engine.snapshot().messages.values().all(|list| list.is_empty()));
    }

    #[test]
    fn prompt_config_contacts_are_merged() {
        let store = MemoryStore::new();
        let mut prompt = PromptConfig::default();
        prompt.contacts = vec![Contact::new("dantuo", "但拓")];
        save_prompt_config(&store, &prompt, "editor").unwrap();

        let engine = engine_on(&store);
        assert_eq!(engine.sync_contacts_from_prompt_config(), 1);
        assert_eq!(engine.active_contact_id().as_deref(), Some("dantuo"));
        assert_eq!(engine.sync_contacts_from_prompt_config(), 0);
    }

    #[test]
    fn api_block_mirrors_credentials() {
        let store = MemoryStore::new();
        let engine = engine_on(&store);
        engine
            .save_api_config(&ApiConfig::new("https://api.x.com", "sk", "m"))
            .unwrap();
        assert_eq!(engine.snapshot().api.model, "m");
    }

    #[tokio::test]
    async fn foreign_writes_trigger_reload_and_last_writer_wins() {
        let store = MemoryStore::new();
        let tab_a = engine_on(&store);
        let tab_b = engine_on(&store);
        let reloads = Arc::new(AtomicUsize::new(0));
        let counter = reloads.clone();
        let _sub = tab_b.on_change(move |event| {
            if event.kind == ChangeKind::Reload {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let watcher = tab_b.spawn_storage_watcher();

        tab_a.append_message("ybm", &Channel::main(), Role::User, "from a", None);
        for _ in 0..100 {
            if reloads.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(reloads.load(Ordering::SeqCst) >= 1);
        let seen = tab_b.get_messages(&MessageQuery {
            contact_id: Some("ybm".into()),
            channel: None,
        });
        assert_eq!(seen.len(), 1);

        // B writes its full state; A's message survives only because B
        // reloaded before writing.
        tab_b.append_message("ybm", &Channel::main(), Role::User, "from b", None);
        let stored: EngineState = read_json(&store, ENGINE_STATE_KEY).unwrap().unwrap();
        assert_eq!(stored.messages["ybm"].len(), 2);

        watcher.abort();
    }

    #[tokio::test]
    async fn file_backed_engines_on_one_directory_stay_in_sync() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            storage_dir: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let tab_a = ChatEngine::open(config.clone()).unwrap();
        let tab_b = ChatEngine::open(config).unwrap();
        let watcher = tab_b.spawn_storage_watcher();

        tab_a.append_message("ybm", &Channel::main(), Role::User, "from a", None);
        let query = MessageQuery {
            contact_id: Some("ybm".into()),
            channel: None,
        };
        for _ in 0..100 {
            if !tab_b.get_messages(&query).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(tab_b.get_messages(&query).len(), 1);

        watcher.abort();
    }

    #[test]
    fn display_helpers_read_their_documents() {
        let store = MemoryStore::new();
        store
            .save(
                crate::storage_manager::RENDER_REGEX_KEY,
                r#"{"enabled":true,"rules":[{"pattern":"笑","replace":"😄","enabled":true}]}"#,
                "t",
            )
            .unwrap();
        let engine = engine_on(&store);
        assert_eq!(engine.display_text("<think>x</think>笑"), "😄");
        assert_eq!(engine.user_display_name(), "user");
    }
}
