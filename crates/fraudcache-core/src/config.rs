//! Worker configuration management.
//!
//! Holds the deployed cache version, the origin the client is served from,
//! the fixed precache asset list and the API path prefixes that select the
//! network-first strategy.
//!
//! Configuration is stored at `~/.config/fraudcache/config.json` and may be
//! overridden through `FRAUDCACHE_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::{TierKind, TierName};
use crate::error::CacheError;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "fraudcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_ORIGIN: &str = "http://localhost:5000";

const DEFAULT_VERSION: &str = "1.0.0";

/// Tag the client registers for platform-dispatched background sync.
pub const DEFAULT_SYNC_TAG: &str = "background-prediction";

/// Toasts disappear after three seconds.
const DEFAULT_NOTIFICATION_TTL_SECS: u64 = 3;

/// How often the worker re-checks connectivity.
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 15;

/// The application shell: every page, the shared script and style, icons and
/// the three CDN libraries the pages load.
const DEFAULT_PRECACHE_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/model.html",
    "/visualizations.html",
    "/analysis.html",
    "/theory.html",
    "/feature.html",
    "/amount-trends.html",
    "/static/css/style.css",
    "/static/js/script.js",
    "/static/js/model.js",
    "/static/images/1.svg",
    "/static/images/1.ico",
    "https://cdn.plot.ly/plotly-2.32.0.min.js",
    "https://cdn.jsdelivr.net/npm/papaparse@5.4.1/papaparse.min.js",
    "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/css/all.min.css",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deployed asset-set version; bumping it rebuilds the static tier.
    pub version: String,
    /// Origin the client is served from; validated by [`Config::origin_url`].
    pub origin: String,
    pub precache_assets: Vec<String>,
    pub api_prefixes: Vec<String>,
    pub sync_tag: String,
    pub notification_ttl_secs: u64,
    pub probe_interval_secs: u64,
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            precache_assets: DEFAULT_PRECACHE_ASSETS.iter().map(|s| s.to_string()).collect(),
            api_prefixes: vec!["/predict".to_string()],
            sync_tag: DEFAULT_SYNC_TAG.to_string(),
            notification_ttl_secs: DEFAULT_NOTIFICATION_TTL_SECS,
            probe_interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
            cache_dir: None,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// The version becomes part of cache directory names, so it is limited
    /// to ASCII letters, digits, `.`, `-` and `_`, and may not contain `..`.
    pub fn validate(&self) -> Result<()> {
        let version_ok = !self.version.is_empty()
            && !self.version.contains("..")
            && self
                .version
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !version_ok {
            anyhow::bail!("Invalid version {:?}", self.version);
        }
        self.origin_url()
            .with_context(|| format!("Invalid origin: {}", self.origin))?;
        Ok(())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// `FRAUDCACHE_ORIGIN`, `FRAUDCACHE_VERSION` and `FRAUDCACHE_CACHE_DIR`
    /// take precedence over the file.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(origin) = std::env::var("FRAUDCACHE_ORIGIN") {
            Url::parse(&origin)
                .with_context(|| format!("FRAUDCACHE_ORIGIN is not a valid URL: {}", origin))?;
            self.origin = origin;
        }
        if let Ok(version) = std::env::var("FRAUDCACHE_VERSION") {
            self.version = version;
        }
        if let Ok(dir) = std::env::var("FRAUDCACHE_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn origin_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.origin)
    }

    pub fn static_tier(&self) -> TierName {
        TierName::new(TierKind::Static, &self.version)
    }

    pub fn dynamic_tier(&self) -> TierName {
        TierName::new(TierKind::Dynamic, &self.version)
    }

    /// Tier names that survive activation of this version.
    pub fn retained_tiers(&self) -> Vec<TierName> {
        vec![self.static_tier(), self.dynamic_tier()]
    }

    /// Precache entries resolved against the origin. Absolute entries (CDN
    /// assets) are kept as written.
    pub fn asset_urls(&self) -> Result<Vec<Url>, CacheError> {
        let origin = self.origin_url().map_err(|e| CacheError::InvalidAsset {
            url: self.origin.clone(),
            reason: e.to_string(),
        })?;
        self.precache_assets
            .iter()
            .map(|asset| {
                origin.join(asset).map_err(|e| CacheError::InvalidAsset {
                    url: asset.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    pub fn is_api_path(&self, path: &str) -> bool {
        self.api_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn notification_ttl(&self) -> Duration {
        Duration::from_secs(self.notification_ttl_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tier_names() {
        let config = Config::default();
        assert_eq!(config.static_tier().as_str(), "static-v1.0.0");
        assert_eq!(config.dynamic_tier().as_str(), "dynamic-v1.0.0");
        assert_eq!(config.retained_tiers().len(), 2);
    }

    #[test]
    fn test_asset_urls_resolve_against_origin() {
        let config = Config::default();
        let urls = config.asset_urls().unwrap();
        assert_eq!(urls.len(), 16);
        assert_eq!(urls[0].as_str(), "http://localhost:5000/");
        assert_eq!(urls[8].as_str(), "http://localhost:5000/static/css/style.css");
        assert_eq!(urls[13].host_str(), Some("cdn.plot.ly"));
    }

    #[test]
    fn test_is_api_path() {
        let config = Config::default();
        assert!(config.is_api_path("/predict"));
        assert!(config.is_api_path("/predict/batch"));
        assert!(!config.is_api_path("/model.html"));
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.version, DEFAULT_VERSION);
    }

    #[test]
    fn test_load_from_partial_file_fills_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"version": "2"}"#).unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.static_tier().as_str(), "static-v2");
        assert_eq!(config.sync_tag, DEFAULT_SYNC_TAG);
    }

    #[test]
    fn test_validate_rejects_versions_that_escape_the_cache_dir() {
        for version in ["../../outside", "1/2", "..", "1\\2", "", "1 0"] {
            let config = Config {
                version: version.to_string(),
                ..Config::default()
            };
            assert!(config.validate().is_err(), "accepted {:?}", version);
        }
        for version in ["1.0.0", "2", "2024-10_rc1"] {
            let config = Config {
                version: version.to_string(),
                ..Config::default()
            };
            config.validate().unwrap();
        }
    }

    #[test]
    fn test_validate_rejects_bad_origin() {
        let config = Config {
            origin: "not a url".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
