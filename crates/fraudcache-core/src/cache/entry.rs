use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::http::{Request, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierKind {
    /// Immutable asset snapshot, rebuilt only on version bump.
    Static,
    /// Runtime-populated, continuously overwritten.
    Dynamic,
}

impl TierKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            TierKind::Static => "static",
            TierKind::Dynamic => "dynamic",
        }
    }
}

/// Versioned tier name such as `static-v1.0.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TierName(String);

impl TierName {
    pub fn new(kind: TierKind, version: &str) -> Self {
        Self(format!("{}-v{}", kind.prefix(), version))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TierName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TierName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Entries are keyed by method and URL (fragment stripped).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub method: String,
    pub url: String,
}

impl CacheKey {
    pub fn new(method: &str, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
        }
    }

    pub fn get(url: &Url) -> Self {
        Self::new("GET", url)
    }

    pub fn for_request(request: &Request) -> Self {
        Self::new(request.method.as_str(), &request.url)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A captured response. Replaced wholesale on every store.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub response: Response,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}
