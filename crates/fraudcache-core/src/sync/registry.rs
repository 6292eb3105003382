use std::collections::BTreeSet;
use std::sync::Mutex;

use tracing::debug;

/// Pending background-sync registrations, keyed by tag.
///
/// Registering a tag that is already pending is a no-op. The host drains
/// the set once connectivity is available and dispatches one sync event per
/// tag.
#[derive(Debug, Default)]
pub struct SyncRegistry {
    pending: Mutex<BTreeSet<String>>,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tag: &str) {
        let inserted = self
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(tag.to_string());
        if inserted {
            debug!(tag, "Registered background sync");
        }
    }

    pub fn is_pending(&self, tag: &str) -> bool {
        self.pending.lock().unwrap_or_else(|p| p.into_inner()).contains(tag)
    }

    pub fn take_pending(&self) -> Vec<String> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(|p| p.into_inner()))
            .into_iter()
            .collect()
    }
}
