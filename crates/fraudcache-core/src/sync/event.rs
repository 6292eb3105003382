//! Platform events and the actions their handlers return.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::FetchError;
use crate::http::{Request, Response};

/// Every event the host can deliver to the worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    /// Background sync registered under `tag`.
    Sync { tag: String },
    Push { text: Option<String> },
    Connectivity { online: bool },
    /// The user answered the update prompt.
    UpdatePromptResponse { accepted: bool },
}

impl WorkerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerEvent::Install => "install",
            WorkerEvent::Activate => "activate",
            WorkerEvent::Fetch(_) => "fetch",
            WorkerEvent::Sync { .. } => "sync",
            WorkerEvent::Push { .. } => "push",
            WorkerEvent::Connectivity { .. } => "connectivity",
            WorkerEvent::UpdatePromptResponse { .. } => "update_prompt_response",
        }
    }
}

pub type ResponseFuture = BoxFuture<'static, Result<Response, FetchError>>;

/// Work the host must keep the worker alive for. An event is finished only
/// once every extension it returned has settled.
pub struct LifetimeExtension {
    label: &'static str,
    work: BoxFuture<'static, anyhow::Result<()>>,
}

impl LifetimeExtension {
    pub fn new(label: &'static str, work: impl Future<Output = anyhow::Result<()>> + Send + 'static) -> Self {
        Self {
            label,
            work: work.boxed(),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub async fn settle(self) -> anyhow::Result<()> {
        self.work.await
    }
}

impl fmt::Debug for LifetimeExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifetimeExtension").field("label", &self.label).finish()
    }
}

/// What a handler asks the runtime to do. Building an action performs no
/// I/O; the runtime drives the futures.
#[derive(Default)]
pub struct EventAction {
    pub respond_with: Option<ResponseFuture>,
    pub wait_until: Vec<LifetimeExtension>,
}

impl EventAction {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn respond_with(response: impl Future<Output = Result<Response, FetchError>> + Send + 'static) -> Self {
        Self {
            respond_with: Some(response.boxed()),
            wait_until: Vec::new(),
        }
    }

    pub fn wait_until(extension: LifetimeExtension) -> Self {
        Self {
            respond_with: None,
            wait_until: vec![extension],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.respond_with.is_none() && self.wait_until.is_empty()
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.wait_until.iter().map(LifetimeExtension::label).collect()
    }
}

impl fmt::Debug for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventAction")
            .field("responds", &self.respond_with.is_some())
            .field("wait_until", &self.wait_until)
            .finish()
    }
}
