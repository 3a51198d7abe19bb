use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// State was mutated and flushed by this engine.
    Save,
    /// State was replaced from storage.
    Reload,
    /// A send or reroll finished writing its assistant message.
    TurnCompleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub contact_id: Option<String>,
    /// Set on every n-th completed turn.
    pub summary_due: bool,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, contact_id: Option<&str>) -> Self {
        Self {
            kind,
            contact_id: contact_id.map(str::to_string),
            summary_due: false,
        }
    }
}

type Callback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;
type Listeners = Mutex<HashMap<u64, Callback>>;

/// In-process observer list.
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    inner: Arc<Listeners>,
    next_id: Arc<AtomicU64>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut map) = self.inner.lock() {
            map.insert(id, Arc::new(callback));
        }
        Subscription {
            id,
            listeners: Arc::downgrade(&self.inner),
        }
    }

    /// Calls every listener outside the lock so callbacks may subscribe or
    /// unsubscribe.
    pub fn notify(&self, event: &ChangeEvent) {
        let callbacks: Vec<Callback> = match self.inner.lock() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => return,
        };
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or(0)
    }
}

/// Removes its listener when dropped or on [`Subscription::unsubscribe`].
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            if let Ok(mut map) = listeners.lock() {
                map.remove(&self.id);
            }
        }
    }
}
