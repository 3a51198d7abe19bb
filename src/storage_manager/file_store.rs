use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::sync::broadcast;

use super::{publish, KeyValueStore, StorageEvent, EVENT_CAPACITY};
use crate::error::AppResult;

lazy_static::lazy_static! {
    /// Event channels keyed by canonical store directory, so every store
    /// opened on one directory in this process sees the others' writes.
    static ref DIRECTORY_CHANNELS: Mutex<HashMap<PathBuf, broadcast::Sender<StorageEvent>>> =
        Mutex::new(HashMap::new());
}

fn channel_for(root: &Path) -> broadcast::Sender<StorageEvent> {
    let key = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let mut channels = DIRECTORY_CHANNELS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    channels
        .entry(key)
        .or_insert_with(|| broadcast::channel(EVENT_CAPACITY).0)
        .clone()
}

/// One `<key>.json` file per document under a directory.
pub struct FileStore {
    root: PathBuf,
    events: broadcast::Sender<StorageEvent>,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let events = channel_for(&root);
        Ok(Self { root, events })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{}.json", safe))
    }
}

impl KeyValueStore for FileStore {
    fn load(&self, key: &str) -> AppResult<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    fn save(&self, key: &str, value: &str, origin: &str) -> AppResult<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        tracing::debug!(key, bytes = value.len(), "document saved");
        publish(&self.events, key, origin);
        Ok(())
    }

    fn remove(&self, key: &str, origin: &str) -> AppResult<()> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(path)?;
            publish(&self.events, key, origin);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.save("engine_state", r#"{"version":1}"#, "a").unwrap();
        }
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(
            store.load("engine_state").unwrap().as_deref(),
            Some(r#"{"version":1}"#)
        );
        assert!(store.load("missing").unwrap().is_none());
        assert!(!dir.path().join("engine_state.json.tmp").exists());
    }

    #[test]
    fn keys_are_sanitised_into_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.save("../escape", "x", "a").unwrap();
        assert!(dir.path().join("___escape.json").exists());

        let mut rx = store.subscribe();
        store.remove("../escape", "a").unwrap();
        assert_eq!(rx.try_recv().unwrap().key, "../escape");
        assert!(store.load("../escape").unwrap().is_none());
    }

    #[test]
    fn stores_on_one_directory_share_events() {
        let dir = tempfile::tempdir().unwrap();
        let tab_a = FileStore::open(dir.path()).unwrap();
        let tab_b = FileStore::open(dir.path().join(".")).unwrap();
        let mut rx = tab_b.subscribe();

        tab_a.save("engine_state", "{}", "a").unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.key, "engine_state");
        assert_eq!(event.origin, "a");

        let other = tempfile::tempdir().unwrap();
        let mut unrelated = FileStore::open(other.path()).unwrap().subscribe();
        tab_a.save("engine_state", "{}", "a").unwrap();
        assert!(unrelated.try_recv().is_err());
    }
}
