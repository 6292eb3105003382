use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use super::coordinator::SyncCoordinator;
use super::event::WorkerEvent;
use crate::error::FetchError;
use crate::http::Response;

/// Outcome of one settled lifetime extension.
#[derive(Debug)]
pub struct Settled {
    pub label: &'static str,
    pub result: anyhow::Result<()>,
}

#[derive(Debug, Default)]
pub struct Dispatched {
    /// Present for events answered with a response (fetches).
    pub response: Option<Result<Response, FetchError>>,
    pub settled: Vec<Settled>,
}

impl Dispatched {
    /// True when every lifetime extension succeeded.
    pub fn is_ok(&self) -> bool {
        self.settled.iter().all(|s| s.result.is_ok())
    }

    pub fn first_error(&self) -> Option<&anyhow::Error> {
        self.settled.iter().find_map(|s| s.result.as_ref().err())
    }
}

/// Drives the actions returned by the coordinator: the response and every
/// lifetime extension run concurrently, and dispatch returns only once all
/// of them have settled.
#[derive(Clone)]
pub struct WorkerRuntime {
    coordinator: Arc<SyncCoordinator>,
}

impl WorkerRuntime {
    pub fn new(coordinator: Arc<SyncCoordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub async fn dispatch(&self, event: WorkerEvent) -> Dispatched {
        let name = event.name();
        let action = self.coordinator.handle(event);

        let extensions = join_all(action.wait_until.into_iter().map(|extension| async move {
            let label = extension.label();
            let result = extension.settle().await;
            if let Err(ref e) = result {
                warn!(event = name, extension = label, error = %format!("{:#}", e), "Lifetime extension failed");
            }
            Settled { label, result }
        }));

        let (response, settled) = match action.respond_with {
            Some(response) => {
                let (response, settled) = futures::join!(response, extensions);
                (Some(response), settled)
            }
            None => (None, extensions.await),
        };

        debug!(event = name, extensions = settled.len(), "Event settled");
        Dispatched { response, settled }
    }
}
