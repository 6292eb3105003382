use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};
use url::Url;

use super::entry::{CacheEntry, CacheKey, TierName};
use super::storage::CacheStorage;
use crate::error::CacheError;
use crate::http::{Request, Response, Transport};

/// Maximum concurrent asset fetches during precache.
const MAX_CONCURRENT_PRECACHE: usize = 6;

pub struct CacheManager {
    storage: Arc<dyn CacheStorage>,
    transport: Arc<dyn Transport>,
}

impl CacheManager {
    pub fn new(storage: Arc<dyn CacheStorage>, transport: Arc<dyn Transport>) -> Self {
        Self { storage, transport }
    }

    /// Fetch every asset and publish them as `tier`.
    ///
    /// All-or-nothing: the first asset that fails to fetch (or answers with a
    /// non-success status) aborts the whole operation and nothing is written.
    /// Cross-origin assets are accepted here even though their responses may
    /// be opaque. Returns the number of entries stored.
    pub async fn precache(&self, tier: &TierName, assets: &[Url]) -> Result<usize, CacheError> {
        info!(tier = %tier, assets = assets.len(), "Precaching static assets");

        let fetched: Vec<(CacheKey, CacheEntry)> = stream::iter(assets.iter().cloned())
            .map(|asset| Self::fetch_asset(Arc::clone(&self.transport), asset))
            .buffered(MAX_CONCURRENT_PRECACHE)
            .try_collect()
            .await
            .inspect_err(|e| warn!(tier = %tier, error = e as &dyn std::error::Error, "Precache failed, tier not created"))?;

        let count = fetched.len();
        self.storage
            .install_tier(tier.as_str(), fetched)
            .inspect_err(|e| warn!(tier = %tier, error = %e, "Failed to write precached tier"))?;

        info!(tier = %tier, entries = count, "Precache complete");
        Ok(count)
    }

    async fn fetch_asset(
        transport: Arc<dyn Transport>,
        asset: Url,
    ) -> Result<(CacheKey, CacheEntry), CacheError> {
        let response = transport
            .fetch(&Request::get(asset.clone()))
            .await
            .map_err(|source| CacheError::Precache {
                url: asset.to_string(),
                source,
            })?;
        if !response.ok() {
            return Err(CacheError::PrecacheStatus {
                url: asset.to_string(),
                status: response.status,
            });
        }
        Ok((CacheKey::get(&asset), CacheEntry::new(response)))
    }

    /// Stored entry for `key` in `tier`, or `None` on a miss. No side effects.
    pub fn lookup(&self, tier: &TierName, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        self.storage.get(tier.as_str(), key)
    }

    /// First hit across `tiers`, searched in order. Storage errors on one
    /// tier are logged and treated as a miss there.
    pub fn match_any(&self, tiers: &[TierName], key: &CacheKey) -> Option<CacheEntry> {
        tiers.iter().find_map(|tier| match self.lookup(tier, key) {
            Ok(hit) => hit,
            Err(e) => {
                debug!(tier = %tier, key = %key, error = %e, "Cache lookup failed");
                None
            }
        })
    }

    /// Write `response` under `key` if it is a complete same-origin response
    /// (status 200, basic). Anything else is silently skipped. Returns
    /// whether the entry was written.
    pub fn store(&self, tier: &TierName, key: CacheKey, response: &Response) -> Result<bool, CacheError> {
        if !response.is_cacheable() {
            debug!(
                key = %key,
                status = response.status,
                response_type = ?response.response_type,
                "Response not cacheable, skipping store"
            );
            return Ok(false);
        }
        self.storage
            .put(tier.as_str(), key, CacheEntry::new(response.clone()))?;
        Ok(true)
    }

    /// Delete every tier not named in `retained`. Idempotent; returns the
    /// names that were deleted by this call.
    pub fn reconcile(&self, retained: &[TierName]) -> Result<Vec<String>, CacheError> {
        let mut deleted = Vec::new();
        for name in self.storage.tier_names()? {
            if retained.iter().any(|keep| keep.as_str() == name) {
                continue;
            }
            info!(tier = %name, "Deleting stale cache tier");
            if self.storage.delete_tier(&name)? {
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    pub fn tier_names(&self) -> Result<Vec<String>, CacheError> {
        self.storage.tier_names()
    }

    pub fn has_tier(&self, tier: &TierName) -> Result<bool, CacheError> {
        self.storage.has_tier(tier.as_str())
    }

    pub fn entry_count(&self, tier: &TierName) -> Result<usize, CacheError> {
        self.storage.entry_count(tier.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================
