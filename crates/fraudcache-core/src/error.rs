use thiserror::Error;

use crate::sync::VersionState;

/// Failure of a single network attempt.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network unreachable: {0}")]
    Unreachable(String),

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl FetchError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Build an error for a reachable server that answered with a non-success status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status {
            404 => FetchError::NotFound(truncated),
            500..=599 => FetchError::ServerError(truncated),
            _ => FetchError::Status {
                status,
                body: truncated,
            },
        }
    }

    /// True when the server was never reached (as opposed to answering with an error).
    pub fn is_network(&self) -> bool {
        matches!(self, FetchError::Unreachable(_) | FetchError::Transport(_))
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Precache of {url} failed")]
    Precache {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Precache of {url} returned status {status}")]
    PrecacheStatus { url: String, status: u16 },

    #[error("Invalid cache tier name: {0:?}")]
    InvalidTierName(String),

    #[error("Storage quota exceeded writing {0}")]
    QuotaExceeded(String),

    #[error("Cache storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache index is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid asset URL {url}: {reason}")]
    InvalidAsset { url: String, reason: String },
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Persisted queue is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Request failed and was queued for retry as {id}")]
    Deferred {
        id: String,
        #[source]
        source: FetchError,
    },
}

/// Rejected move in a cache version's lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Version {version} cannot move from {from} to {to}")]
    InvalidTransition {
        version: String,
        from: VersionState,
        to: VersionState,
    },
}
