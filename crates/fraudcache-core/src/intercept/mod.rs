//! Request interception and per-category caching strategies.
//!
//! Every request raised by the page falls into exactly one category:
//! - `Api`: network-first, degrading to a synthesised offline payload
//! - `Navigation`: cache-first, with the cached root document as last resort
//! - `Asset`: cache-first, storing fresh same-origin responses on the way out

pub mod classify;
pub mod interceptor;

pub use classify::{classify, RequestCategory};
pub use interceptor::{FetchInterceptor, OfflineErrorPayload};
