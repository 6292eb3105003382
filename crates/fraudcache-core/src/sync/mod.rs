//! Version lifecycle, event dispatch and the replay triggers.

mod coordinator;
mod event;
mod lifecycle;
mod registry;
mod runtime;

pub use coordinator::{SyncCoordinator, WorkerServices};
pub use event::{EventAction, LifetimeExtension, ResponseFuture, WorkerEvent};
pub use lifecycle::{previous_version, Lifecycle, VersionState};
pub use registry::SyncRegistry;
pub use runtime::{Dispatched, Settled, WorkerRuntime};
