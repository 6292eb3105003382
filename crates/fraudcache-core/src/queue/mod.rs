//! Durable queue of deferred prediction calls.
//!
//! Calls that cannot reach the backend are recorded as `QueueItem`s and
//! persisted as one ordered collection on every mutation. A replay pass
//! re-sends them in FIFO order, removing only the ones that were delivered.

pub mod backend;
pub mod item;
pub mod offline_queue;

pub use backend::{FileQueueBackend, MemoryQueueBackend, QueueBackend};
pub use item::QueueItem;
pub use offline_queue::{DeliveredItem, OfflineQueue, ReplayReport, SubmitOutcome};
