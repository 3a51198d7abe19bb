use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use super::{publish, KeyValueStore, StorageEvent, EVENT_CAPACITY};
use crate::error::{AppError, AppResult};

/// In-process store. Clones share the same documents and event channel,
/// which is how tests model two tabs over one browser storage.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, String>>>,
    events: broadcast::Sender<StorageEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.inner
            .lock()
            .map_err(|e| AppError::Other(format!("Lock error: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str, origin: &str) -> AppResult<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        publish(&self.events, key, origin);
        Ok(())
    }

    fn remove(&self, key: &str, origin: &str) -> AppResult<()> {
        let removed = self.lock()?.remove(key).is_some();
        if removed {
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
    fn clones_share_documents_and_events() {
        let tab_a = MemoryStore::new();
        let tab_b = tab_a.clone();
        let mut rx = tab_b.subscribe();

        tab_a.save("engine_state", "{}", "a").unwrap();
        assert_eq!(tab_b.load("engine_state").unwrap().as_deref(), Some("{}"));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.key, "engine_state");
        assert_eq!(event.origin, "a");

        tab_b.remove("engine_state", "b").unwrap();
        assert!(tab_a.load("engine_state").unwrap().is_none());
        assert_eq!(rx.try_recv().unwrap().origin, "b");

        // Removing a missing key is silent.
        tab_b.remove("engine_state", "b").unwrap();
        assert!(rx.try_recv().is_err());
    }
}
