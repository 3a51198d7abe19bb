use std::sync::atomic::{AtomicU32, Ordering};

/// Counts completed turns and flags every `every`-th one as due for a
/// summary. Summarisation itself is not performed here.
#[derive(Debug)]
pub struct TurnCounter {
    every: u32,
    completed: AtomicU32,
}

impl TurnCounter {
    pub fn new(every: u32) -> Self {
        Self {
            every,
            completed: AtomicU32::new(0),
        }
    }

    /// Records one completed turn. Returns true when a summary is due.
    pub fn record_turn(&self) -> bool {
        let count = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.every > 0 && count % self.every == 0
    }

    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.completed.store(0, Ordering::SeqCst);
    }
}
