use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::classify::{classify, RequestCategory};
use crate::cache::{CacheKey, CacheManager, TierKind, TierName};
use crate::config::Config;
use crate::error::FetchError;
use crate::http::{Request, Response, Transport};

const OFFLINE_ERROR: &str = "Offline";
const OFFLINE_MESSAGE: &str = "Please check your internet connection";

/// Body served in place of a network failure on API calls.
///
/// It is delivered with status 200, so the page cannot tell it apart from a
/// server answer by status alone; only the `error` field (and the `Default`
/// response type on the Rust side) marks it as synthesised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct OfflineErrorPayload {
    pub error: String,
    pub message: String,
}

impl Default for OfflineErrorPayload {
    fn default() -> Self {
        Self {
            error: OFFLINE_ERROR.to_string(),
            message: OFFLINE_MESSAGE.to_string(),
        }
    }
}

/// Tier pair of the version whose caches answer page traffic.
#[derive(Debug, Clone)]
struct ServedTiers {
    version: String,
    static_tier: TierName,
    dynamic_tier: TierName,
}

impl ServedTiers {
    fn for_version(version: &str) -> Self {
        Self {
            version: version.to_string(),
            static_tier: TierName::new(TierKind::Static, version),
            dynamic_tier: TierName::new(TierKind::Dynamic, version),
        }
    }
}

pub struct FetchInterceptor {
    cache: Arc<CacheManager>,
    transport: Arc<dyn Transport>,
    served: Mutex<ServedTiers>,
    root_document: Url,
    api_prefixes: Vec<String>,
}

impl FetchInterceptor {
    pub fn new(cache: Arc<CacheManager>, transport: Arc<dyn Transport>, config: &Config) -> Result<Self, FetchError> {
        let root_document = config
            .origin_url()
            .and_then(|origin| origin.join("/"))
            .map_err(|e| FetchError::InvalidRequest(format!("origin has no root document: {}", e)))?;

        Ok(Self {
            cache,
            transport,
            served: Mutex::new(ServedTiers::for_version(&config.version)),
            root_document,
            api_prefixes: config.api_prefixes.clone(),
        })
    }

    /// Route page traffic through `version`'s tiers from now on.
    pub fn serve_version(&self, version: &str) {
        let mut served = self.served();
        if served.version != version {
            debug!(from = %served.version, to = %version, "Switching served cache version");
            *served = ServedTiers::for_version(version);
        }
    }

    pub fn serving_version(&self) -> String {
        self.served().version.clone()
    }

    fn served(&self) -> MutexGuard<'_, ServedTiers> {
        self.served.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Answer an intercepted request using its category's strategy.
    ///
    /// Only fails when every source is exhausted: the network is unreachable
    /// and no tier (including the root-document fallback for navigations)
    /// holds a usable entry.
    pub async fn handle(&self, request: &Request) -> Result<Response, FetchError> {
        let category = classify(request, &self.api_prefixes);
        debug!(url = %request.url, method = %request.method, ?category, "Intercepted request");

        match category {
            RequestCategory::Api => self.network_first(request).await,
            RequestCategory::Navigation | RequestCategory::Asset => {
                self.cache_first(request, category).await
            }
        }
    }

    fn tiers(&self) -> [TierName; 2] {
        let served = self.served();
        [served.static_tier.clone(), served.dynamic_tier.clone()]
    }

    async fn network_first(&self, request: &Request) -> Result<Response, FetchError> {
        match self.transport.fetch(request).await {
            Ok(response) => {
                if request.is_cacheable_read() && response.ok() {
                    self.store_dynamic(request, &response);
                }
                Ok(response)
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "API unreachable, serving offline payload");
                Ok(Response::json(200, &OfflineErrorPayload::default())?)
            }
        }
    }

    async fn cache_first(&self, request: &Request, category: RequestCategory) -> Result<Response, FetchError> {
        let tiers = self.tiers();
        let key = CacheKey::for_request(request);

        if let Some(entry) = self.cache.match_any(&tiers, &key) {
            debug!(key = %key, age = %entry.age_display(), "Serving from cache");
            return Ok(entry.response);
        }

        match self.transport.fetch(request).await {
            Ok(response) => {
                if request.is_cacheable_read() && response.is_cacheable() {
                    self.store_dynamic(request, &response);
                }
                Ok(response)
            }
            Err(e) => {
                if category == RequestCategory::Navigation {
                    let root = CacheKey::get(&self.root_document);
                    if let Some(entry) = self.cache.match_any(&tiers, &root) {
                        warn!(url = %request.url, error = %e, "Navigation failed, serving cached root document");
                        return Ok(entry.response);
                    }
                }
                warn!(url = %request.url, error = %e, "Request failed and no cached copy exists");
                Err(e)
            }
        }
    }

    /// Store failures never fail the request that produced the response.
    fn store_dynamic(&self, request: &Request, response: &Response) {
        let key = CacheKey::for_request(request);
        let tier = self.served().dynamic_tier.clone();
        if let Err(e) = self.cache.store(&tier, key, response) {
            warn!(url = %request.url, error = %e, "Failed to store response in dynamic tier");
        }
    }
}
