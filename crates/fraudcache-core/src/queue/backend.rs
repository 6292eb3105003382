//! Durable storage for the queue, always read and written as a whole.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::item::QueueItem;
use crate::error::QueueError;

/// Queue file name in the cache directory
const QUEUE_FILE: &str = "prediction_queue.json";

pub trait QueueBackend: Send + Sync {
    /// The persisted queue in insertion order; empty if nothing was saved.
    fn load(&self) -> Result<Vec<QueueItem>, QueueError>;

    /// Replace the persisted queue with `items`.
    fn save(&self, items: &[QueueItem]) -> Result<(), QueueError>;
}

/// Keeps the serialized form in memory, so tests exercise the same
/// encode/decode path as the file backend.
#[derive(Default)]
pub struct MemoryQueueBackend {
    stored: Mutex<Option<String>>,
    fail_writes: AtomicBool,
}

impl MemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an already-serialized queue.
    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            stored: Mutex::new(Some(contents.into())),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent save fail, as a full disk would.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn contents(&self) -> Option<String> {
        self.stored.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl QueueBackend for MemoryQueueBackend {
    fn load(&self) -> Result<Vec<QueueItem>, QueueError> {
        match self.contents() {
            Some(contents) => Ok(serde_json::from_str(&contents)?),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, items: &[QueueItem]) -> Result<(), QueueError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(QueueError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "queue storage unavailable",
            )));
        }
        let contents = serde_json::to_string(items)?;
        *self.stored.lock().unwrap_or_else(|p| p.into_inner()) = Some(contents);
        Ok(())
    }
}

/// `prediction_queue.json` in the cache directory.
pub struct FileQueueBackend {
    path: PathBuf,
}

impl FileQueueBackend {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            path: cache_dir.join(QUEUE_FILE),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl QueueBackend for FileQueueBackend {
    fn load(&self) -> Result<Vec<QueueItem>, QueueError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, items: &[QueueItem]) -> Result<(), QueueError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(items)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn items() -> Vec<QueueItem> {
        (0..5)
            .map(|i| QueueItem::new("/predict", serde_json::json!({"features": [i], "model": "rf"})))
            .collect()
    }

    #[test]
    fn test_file_backend_preserves_order() {
        let dir = TempDir::new().unwrap();
        let backend = FileQueueBackend::new(dir.path().join("nested"));
        assert!(backend.load().unwrap().is_empty());

        let items = items();
        backend.save(&items).unwrap();
        assert_eq!(backend.load().unwrap(), items);

        backend.save(&[]).unwrap();
        assert!(backend.load().unwrap().is_empty());
    }

    #[test]
    fn test_file_backend_reports_malformed_state() {
        let dir = TempDir::new().unwrap();
        let backend = FileQueueBackend::new(dir.path().to_path_buf());
        fs::write(backend.path(), "{not json").unwrap();
        assert!(matches!(backend.load(), Err(QueueError::Malformed(_))));
    }

    #[test]
    fn test_memory_backend_round_trip_and_failures() {
        let backend = MemoryQueueBackend::new();
        let items = items();
        backend.save(&items).unwrap();
        assert_eq!(backend.load().unwrap(), items);

        backend.set_fail_writes(true);
        assert!(matches!(backend.save(&[]), Err(QueueError::Io(_))));
        assert_eq!(backend.load().unwrap(), items);
    }
}
