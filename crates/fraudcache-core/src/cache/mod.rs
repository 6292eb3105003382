//! Versioned cache tiers for offline content.
//!
//! This module provides the `CacheManager`, which owns two logical tiers per
//! deployed version:
//! - `static-v{version}`: the application shell, populated all-or-nothing at install
//! - `dynamic-v{version}`: same-origin responses captured at runtime
//!
//! Tiers whose version is no longer current are purged on activation.
//! Entries live behind a `CacheStorage` backend (in memory or on disk).

pub mod entry;
pub mod manager;
pub mod storage;

pub use entry::{CacheEntry, CacheKey, TierKind, TierName};
pub use manager::CacheManager;
pub use storage::{CacheStorage, DiskCacheStorage, MemoryCacheStorage};
