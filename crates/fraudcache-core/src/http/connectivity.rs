use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Answers "is the network reachable right now". Consulted before queue
/// replay and before attempting a prediction.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Shared online/offline flag, flipped by whoever observes the network
/// (the worker's probe loop, or tests).
#[derive(Debug, Clone)]
pub struct ConnectivityFlag {
    online: Arc<AtomicBool>,
}

impl ConnectivityFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    /// Returns true when the value actually changed.
    pub fn set(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::SeqCst) != online
    }
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
