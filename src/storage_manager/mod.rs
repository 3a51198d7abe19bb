//! Whole-document key-value persistence.
//!
//! Every logical store (engine state, API credentials, prompt config,
//! persona, ...) is one serialized JSON blob under one key. Writes are
//! broadcast as [`StorageEvent`]s tagged with the writer's id so that other
//! engine instances sharing the store can reload; there is no locking and
//! the last full-document write wins.

pub mod file_store;
pub mod lorebook;
pub mod memory_store;
pub mod personas;
pub mod settings;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::AppResult;

pub use file_store::FileStore;
pub use memory_store::MemoryStore;

pub const ENGINE_STATE_KEY: &str = "engine_state";
pub const API_CONFIG_KEY: &str = "api_config";
pub const PROMPT_CONFIG_KEY: &str = "prompt_config";
pub const PERSONA_KEY: &str = "persona";
pub const USER_PROFILE_KEY: &str = "user_profile";
pub const RENDER_REGEX_KEY: &str = "render_regex";

pub(crate) const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// Id of the engine instance that wrote the document.
    pub origin: String,
}

pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> AppResult<Option<String>>;
    fn save(&self, key: &str, value: &str, origin: &str) -> AppResult<()>;
    fn remove(&self, key: &str, origin: &str) -> AppResult<()>;
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}

pub(crate) fn publish(events: &broadcast::Sender<StorageEvent>, key: &str, origin: &str) {
    // No subscribers is fine.
    let _ = events.send(StorageEvent {
        key: key.to_string(),
        origin: origin.to_string(),
    });
}

pub fn read_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> AppResult<Option<T>> {
    match store.load(key)? {
        Some(raw) if !raw.trim().is_empty() => Ok(Some(serde_json::from_str(&raw)?)),
        _ => Ok(None),
    }
}

/// Lenient read: unreadable or corrupt documents fall back to the default.
pub fn read_json_or_default<T: DeserializeOwned + Default>(store: &dyn KeyValueStore, key: &str) -> T {
    match read_json(store, key) {
        Ok(Some(value)) => value,
        Ok(None) => T::default(),
        Err(e) => {
            tracing::warn!(key, error = %e, "discarding unreadable document");
            T::default()
        }
    }
}

pub fn write_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    origin: &str,
) -> AppResult<()> {
    let raw = serde_json::to_string(value)?;
    store.save(key, &raw, origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Doc {
        version: u32,
        name: String,
    }

    #[test]
    fn typed_round_trip_and_corrupt_fallback() {
        let store = MemoryStore::new();
        assert_eq!(read_json::<Doc>(&store, "doc").unwrap(), None);

        let doc = Doc {
            version: 1,
            name: "ybm".into(),
        };
        write_json(&store, "doc", &doc, "tab-a").unwrap();
        assert_eq!(read_json::<Doc>(&store, "doc").unwrap(), Some(doc));

        store.save("doc", "{not json", "tab-a").unwrap();
        assert!(read_json::<Doc>(&store, "doc").is_err());
        assert_eq!(read_json_or_default::<Doc>(&store, "doc"), Doc::default());
    }
}
