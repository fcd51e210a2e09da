//! Record of frames written to a simulated rig

use std::sync::{Arc, Mutex, MutexGuard};

/// Cloneable log of every frame the simulator received, in order
#[derive(Debug, Clone, Default)]
pub struct SimJournal {
    frames: Arc<Mutex<Vec<String>>>,
}

impl SimJournal {
    /// Create an empty journal
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        // A test that panicked while holding the lock must not hide the log
        self.frames.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn record(&self, frame: String) {
        self.lock().push(frame);
    }

    /// Snapshot of all frames, terminators included
    pub fn frames(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// True if `frame` was written at least once
    pub fn contains(&self, frame: &str) -> bool {
        self.lock().iter().any(|f| f == frame)
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.lock().clear();
    }
}
