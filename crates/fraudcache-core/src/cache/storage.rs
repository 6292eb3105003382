//! Cache storage trait with in-memory and on-disk implementations.
//!
//! Every single-key operation is atomic; there are no cross-key
//! transactions except `install_tier`, which publishes a whole tier at once.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::entry::{CacheEntry, CacheKey};
use crate::error::CacheError;
use crate::http::{Response, ResponseType};

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
    /// Names of every tier currently present.
    fn tier_names(&self) -> Result<Vec<String>, CacheError>;

    fn has_tier(&self, tier: &str) -> Result<bool, CacheError>;

    /// Publish a complete tier, replacing any tier of the same name. Either
    /// every entry becomes visible or the storage is left unchanged.
    fn install_tier(&self, tier: &str, entries: Vec<(CacheKey, CacheEntry)>) -> Result<(), CacheError>;

    /// Returns whether a tier was removed.
    fn delete_tier(&self, tier: &str) -> Result<bool, CacheError>;

    fn get(&self, tier: &str, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Write one entry, creating the tier if needed.
    fn put(&self, tier: &str, key: CacheKey, entry: CacheEntry) -> Result<(), CacheError>;

    fn entry_count(&self, tier: &str) -> Result<usize, CacheError>;
}

// ============================================================================
// In-memory storage
// ============================================================================

type Tier = HashMap<CacheKey, CacheEntry>;

/// Volatile storage for tests and embedders without a disk.
#[derive(Default)]
pub struct MemoryCacheStorage {
    tiers: Mutex<BTreeMap<String, Tier>>,
    /// Total body bytes allowed across all tiers, if limited.
    quota_bytes: Option<usize>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            tiers: Mutex::default(),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Tier>> {
        self.tiers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn used_bytes(tiers: &BTreeMap<String, Tier>, skip_tier: Option<&str>) -> usize {
        tiers
            .iter()
            .filter(|(name, _)| Some(name.as_str()) != skip_tier)
            .flat_map(|(_, tier)| tier.values())
            .map(|entry| entry.response.body.len())
            .sum()
    }
}

impl CacheStorage for MemoryCacheStorage {
    fn tier_names(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.lock().keys().cloned().collect())
    }

    fn has_tier(&self, tier: &str) -> Result<bool, CacheError> {
        Ok(self.lock().contains_key(tier))
    }

    fn install_tier(&self, tier: &str, entries: Vec<(CacheKey, CacheEntry)>) -> Result<(), CacheError> {
        let mut tiers = self.lock();
        if let Some(quota) = self.quota_bytes {
            let incoming: usize = entries.iter().map(|(_, e)| e.response.body.len()).sum();
            if Self::used_bytes(&tiers, Some(tier)) + incoming > quota {
                return Err(CacheError::QuotaExceeded(tier.to_string()));
            }
        }
        tiers.insert(tier.to_string(), entries.into_iter().collect());
        Ok(())
    }

    fn delete_tier(&self, tier: &str) -> Result<bool, CacheError> {
        Ok(self.lock().remove(tier).is_some())
    }

    fn get(&self, tier: &str, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.lock().get(tier).and_then(|t| t.get(key)).cloned())
    }

    fn put(&self, tier: &str, key: CacheKey, entry: CacheEntry) -> Result<(), CacheError> {
        let mut tiers = self.lock();
        if let Some(quota) = self.quota_bytes {
            let replaced = tiers
                .get(tier)
                .and_then(|t| t.get(&key))
                .map(|e| e.response.body.len())
                .unwrap_or(0);
            let used = Self::used_bytes(&tiers, None) - replaced;
            if used + entry.response.body.len() > quota {
                return Err(CacheError::QuotaExceeded(key.url));
            }
        }
        tiers.entry(tier.to_string()).or_default().insert(key, entry);
        Ok(())
    }

    fn entry_count(&self, tier: &str) -> Result<usize, CacheError> {
        Ok(self.lock().get(tier).map(|t| t.len()).unwrap_or(0))
    }
}

// ============================================================================
// Disk storage
// ============================================================================

const TIERS_DIR: &str = "tiers";
const INDEX_FILE: &str = "index.json";
const BODIES_DIR: &str = "bodies";
const STAGING_PREFIX: &str = ".staging-";

/// Index record for one entry; the body lives in `bodies/<body_file>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    key: CacheKey,
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    response_type: ResponseType,
    cached_at: DateTime<Utc>,
    body_file: String,
}

/// Tiers as directories: `tiers/<name>/index.json` plus `tiers/<name>/bodies/`.
pub struct DiskCacheStorage {
    root: PathBuf,
    // Serialises index rewrites so concurrent puts cannot drop each other's entries.
    write_lock: Mutex<()>,
}

impl DiskCacheStorage {
    pub fn new(cache_dir: PathBuf) -> Result<Self, CacheError> {
        fs::create_dir_all(cache_dir.join(TIERS_DIR))?;
        Ok(Self {
            root: cache_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Tier names become single directory names under `tiers/`.
    fn tier_dir(&self, tier: &str) -> Result<PathBuf, CacheError> {
        if tier.is_empty() || tier == "." || tier == ".." || tier.contains(['/', '\\']) {
            return Err(CacheError::InvalidTierName(tier.to_string()));
        }
        Ok(self.root.join(TIERS_DIR).join(tier))
    }

    fn staging_dir(&self, tier: &str) -> Result<PathBuf, CacheError> {
        self.tier_dir(&format!("{}{}", STAGING_PREFIX, tier))
    }

    /// SHA256 of the key for a stable, filesystem-safe body file name.
    fn body_file_name(key: &CacheKey) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.method.as_bytes());
        hasher.update(b" ");
        hasher.update(key.url.as_bytes());
        format!("{}.bin", hex::encode(hasher.finalize()))
    }

    fn read_index(dir: &Path) -> Result<Vec<StoredEntry>, CacheError> {
        let path = dir.join(INDEX_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write to a temporary file and rename so readers never see a torn index.
    fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CacheError> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn write_entry(dir: &Path, key: &CacheKey, entry: &CacheEntry) -> Result<StoredEntry, CacheError> {
        let body_file = Self::body_file_name(key);
        Self::write_atomic(&dir.join(BODIES_DIR).join(&body_file), &entry.response.body)?;
        Ok(StoredEntry {
            key: key.clone(),
            url: entry.response.url.clone(),
            status: entry.response.status,
            headers: entry.response.headers.clone(),
            response_type: entry.response.response_type,
            cached_at: entry.cached_at,
            body_file,
        })
    }

    fn write_index(dir: &Path, index: &[StoredEntry]) -> Result<(), CacheError> {
        let contents = serde_json::to_vec_pretty(index)?;
        Self::write_atomic(&dir.join(INDEX_FILE), &contents)
    }

    fn stage_tier(&self, staging: &Path, entries: &[(CacheKey, CacheEntry)]) -> Result<(), CacheError> {
        fs::create_dir_all(staging.join(BODIES_DIR))?;
        let index = entries
            .iter()
            .map(|(key, entry)| Self::write_entry(staging, key, entry))
            .collect::<Result<Vec<_>, _>>()?;
        Self::write_index(staging, &index)
    }
}

impl CacheStorage for DiskCacheStorage {
    fn tier_names(&self) -> Result<Vec<String>, CacheError> {
        let mut names = Vec::new();
        for dir_entry in fs::read_dir(self.root.join(TIERS_DIR))? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(STAGING_PREFIX) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn has_tier(&self, tier: &str) -> Result<bool, CacheError> {
        Ok(self.tier_dir(tier)?.is_dir())
    }

    fn install_tier(&self, tier: &str, entries: Vec<(CacheKey, CacheEntry)>) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let staging = self.staging_dir(tier)?;
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }

        if let Err(e) = self.stage_tier(&staging, &entries) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        let target = self.tier_dir(tier)?;
        if target.exists() {
            fs::remove_dir_all(&target)?;
        }
        fs::rename(&staging, &target)?;
        debug!(tier, entries = entries.len(), "Installed tier on disk");
        Ok(())
    }

    fn delete_tier(&self, tier: &str) -> Result<bool, CacheError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let dir = self.tier_dir(tier)?;
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(dir)?;
        Ok(true)
    }

    fn get(&self, tier: &str, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let dir = self.tier_dir(tier)?;
        let Some(stored) = Self::read_index(&dir)?.into_iter().find(|e| &e.key == key) else {
            return Ok(None);
        };
        let body = fs::read(dir.join(BODIES_DIR).join(&stored.body_file))?;
        Ok(Some(CacheEntry {
            response: Response {
                url: stored.url,
                status: stored.status,
                headers: stored.headers,
                body,
                response_type: stored.response_type,
            },
            cached_at: stored.cached_at,
        }))
    }

    fn put(&self, tier: &str, key: CacheKey, entry: CacheEntry) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let dir = self.tier_dir(tier)?;
        fs::create_dir_all(dir.join(BODIES_DIR))?;

        let mut index = Self::read_index(&dir)?;
        let stored = Self::write_entry(&dir, &key, &entry)?;
        index.retain(|e| e.key != key);
        index.push(stored);
        Self::write_index(&dir, &index)
    }

    fn entry_count(&self, tier: &str) -> Result<usize, CacheError> {
        Ok(Self::read_index(&self.tier_dir(tier)?)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{TierKind, TierName};
    use crate::test_support::{response, url};
    use tempfile::TempDir;

    fn entry(path: &str, body: &str) -> (CacheKey, CacheEntry) {
        let u = url(path);
        (CacheKey::get(&u), CacheEntry::new(response(&u, 200, body)))
    }

    fn exercise_backend(storage: &dyn CacheStorage) {
        assert!(storage.tier_names().unwrap().is_empty());

        storage
            .install_tier("static-v1", vec![entry("/", "root"), entry("/model.html", "model")])
            .unwrap();
        assert!(storage.has_tier("static-v1").unwrap());
        assert_eq!(storage.entry_count("static-v1").unwrap(), 2);

        let (key, _) = entry("/model.html", "");
        let hit = storage.get("static-v1", &key).unwrap().unwrap();
        assert_eq!(hit.response.body, b"model");
        assert!(storage.get("dynamic-v1", &key).unwrap().is_none());

        let (k, e) = entry("/static/js/script.js", "v1");
        storage.put("dynamic-v1", k.clone(), e).unwrap();
        let (_, e2) = entry("/static/js/script.js", "v2");
        storage.put("dynamic-v1", k.clone(), e2).unwrap();
        assert_eq!(storage.entry_count("dynamic-v1").unwrap(), 1);
        assert_eq!(storage.get("dynamic-v1", &k).unwrap().unwrap().response.body, b"v2");

        assert_eq!(storage.tier_names().unwrap(), vec!["dynamic-v1", "static-v1"]);
        assert!(storage.delete_tier("static-v1").unwrap());
        assert!(!storage.delete_tier("static-v1").unwrap());
        assert_eq!(storage.tier_names().unwrap(), vec!["dynamic-v1"]);
    }

    #[test]
    fn test_memory_storage_operations() {
        exercise_backend(&MemoryCacheStorage::new());
    }

    #[test]
    fn test_disk_storage_operations() {
        let dir = TempDir::new().unwrap();
        exercise_backend(&DiskCacheStorage::new(dir.path().to_path_buf()).unwrap());
    }

    #[test]
    fn test_disk_storage_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let storage = DiskCacheStorage::new(dir.path().to_path_buf()).unwrap();
            storage.install_tier("static-v1", vec![entry("/", "root")]).unwrap();
        }
        let storage = DiskCacheStorage::new(dir.path().to_path_buf()).unwrap();
        let (key, _) = entry("/", "");
        let hit = storage.get("static-v1", &key).unwrap().unwrap();
        assert_eq!(hit.response.body, b"root");
        assert_eq!(hit.response.response_type, ResponseType::Basic);
    }

    #[test]
    fn test_disk_install_replaces_whole_tier() {
        let dir = TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(dir.path().to_path_buf()).unwrap();
        storage
            .install_tier("static-v1", vec![entry("/", "old"), entry("/theory.html", "old")])
            .unwrap();
        storage.install_tier("static-v1", vec![entry("/", "new")]).unwrap();
        assert_eq!(storage.entry_count("static-v1").unwrap(), 1);
        assert_eq!(storage.tier_names().unwrap(), vec!["static-v1"]);
    }

    #[test]
    fn test_memory_quota_rejects_install_without_side_effects() {
        let storage = MemoryCacheStorage::with_quota(8);
        let err = storage
            .install_tier("static-v1", vec![entry("/", "0123456789")])
            .unwrap_err();
        assert!(matches!(err, CacheError::QuotaExceeded(_)));
        assert!(!storage.has_tier("static-v1").unwrap());
    }

    #[test]
    fn test_memory_quota_rejects_put() {
        let storage = MemoryCacheStorage::with_quota(4);
        let (k, e) = entry("/a", "1234");
        storage.put("dynamic-v1", k.clone(), e).unwrap();
        // Replacing the same key reuses its bytes
        let (_, e) = entry("/a", "abcd");
        storage.put("dynamic-v1", k, e).unwrap();
        let (k, e) = entry("/b", "x");
        assert!(matches!(storage.put("dynamic-v1", k, e), Err(CacheError::QuotaExceeded(_))));
    }

    #[test]
    fn test_disk_rejects_tier_names_outside_tiers_dir() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("cache");
        let storage = DiskCacheStorage::new(root.clone()).unwrap();

        let escaping = TierName::new(TierKind::Static, "../../outside");
        let err = storage
            .install_tier(escaping.as_str(), vec![entry("/", "root")])
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidTierName(_)));
        let (k, e) = entry("/a", "1");
        assert!(matches!(storage.put("..", k, e), Err(CacheError::InvalidTierName(_))));
        assert!(storage.has_tier("dynamic-v1\\..").is_err());

        assert!(!dir.path().join("outside").exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        assert!(storage.tier_names().unwrap().is_empty());
    }
}
