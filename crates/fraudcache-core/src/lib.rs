//! Core library for fraudcache.
//!
//! Keeps the fraud detection client usable when the network is unreliable:
//! requests are classified and served from versioned cache tiers, mutating
//! prediction calls that fail while offline are queued durably, and the queue
//! is replayed when connectivity returns.
//!
//! The services are plain values wired together by a composition root (see
//! the `fraudcache-worker` binary). Platform events are dispatched through
//! [`sync::WorkerRuntime`].

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod intercept;
pub mod models;
pub mod notify;
pub mod queue;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{CacheManager, DiskCacheStorage, MemoryCacheStorage};
pub use config::Config;
pub use error::{CacheError, FetchError, LifecycleError, QueueError};
pub use http::{ConnectivityFlag, HttpTransport, Request, Response, Transport};
pub use intercept::FetchInterceptor;
pub use notify::NotificationCenter;
pub use queue::{FileQueueBackend, MemoryQueueBackend, OfflineQueue};
pub use sync::{SyncCoordinator, SyncRegistry, WorkerEvent, WorkerRuntime, WorkerServices};
