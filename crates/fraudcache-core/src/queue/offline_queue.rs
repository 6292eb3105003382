//! The offline queue service.
//!
//! The in-memory queue only changes after the backend accepted the new
//! state, so the two never diverge once an operation returns.
//!
//! There is no lock spanning a replay pass. A replay sends a snapshot of the
//! queue and afterwards removes exactly the delivered ids, so items enqueued
//! mid-pass survive, but two overlapping replays can both send the same item.
//! Failed items are kept with no retry limit or backoff.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::backend::QueueBackend;
use super::item::QueueItem;
use crate::error::{FetchError, QueueError};
use crate::http::{Connectivity, Request, Transport};
use crate::models::PredictionRequest;
use crate::notify::NotificationCenter;
use crate::sync::SyncRegistry;

const QUEUED_MESSAGE: &str = "Prediction queued for when online";
const QUEUED_AFTER_FAILURE_MESSAGE: &str = "Prediction failed. Queued for retry.";

/// Result of a submission through the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Offline: the call was recorded for replay.
    Queued { id: String },
    /// Online: the backend answered with this body.
    Delivered(Value),
}

impl SubmitOutcome {
    /// What the page receives: `{"queued": true}` or the backend's answer.
    pub fn to_json(&self) -> Value {
        match self {
            SubmitOutcome::Queued { .. } => serde_json::json!({ "queued": true }),
            SubmitOutcome::Delivered(body) => body.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveredItem {
    pub id: String,
    pub result: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    /// Results of delivered items, in queue order.
    pub delivered: Vec<DeliveredItem>,
    pub failed: usize,
    /// Queue length after the pass was persisted.
    pub remaining: usize,
    /// True when the pass was skipped because the client is offline.
    pub skipped_offline: bool,
}

pub struct OfflineQueue {
    items: Mutex<Vec<QueueItem>>,
    backend: Arc<dyn QueueBackend>,
    transport: Arc<dyn Transport>,
    connectivity: Arc<dyn Connectivity>,
    origin: Url,
    notifier: Option<Arc<NotificationCenter>>,
    sync: Option<(Arc<SyncRegistry>, String)>,
}

impl OfflineQueue {
    /// Load the persisted queue. A malformed persisted queue is logged and
    /// replaced by an empty one on the next write.
    pub fn open(
        backend: Arc<dyn QueueBackend>,
        transport: Arc<dyn Transport>,
        connectivity: Arc<dyn Connectivity>,
        origin: Url,
    ) -> Result<Self, QueueError> {
        let items = match backend.load() {
            Ok(items) => items,
            Err(QueueError::Malformed(e)) => {
                warn!(error = %e, "Persisted queue is malformed, starting empty");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        if !items.is_empty() {
            info!(items = items.len(), "Loaded offline queue");
        }

        Ok(Self {
            items: Mutex::new(items),
            backend,
            transport,
            connectivity,
            origin,
            notifier: None,
            sync: None,
        })
    }

    /// Raise toasts when submissions are queued.
    pub fn with_notifications(mut self, notifier: Arc<NotificationCenter>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Register `tag` for background sync on every enqueue.
    pub fn with_sync(mut self, registry: Arc<SyncRegistry>, tag: impl Into<String>) -> Self {
        self.sync = Some((registry, tag.into()));
        self
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueueItem>> {
        self.items.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Persist `next`, then make it the in-memory queue.
    fn commit(&self, items: &mut Vec<QueueItem>, next: Vec<QueueItem>) -> Result<(), QueueError> {
        self.backend.save(&next)?;
        *items = next;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of the queue in FIFO order.
    pub fn items(&self) -> Vec<QueueItem> {
        self.lock().clone()
    }

    /// Append a deferred call and persist it. Returns the new item's id.
    pub fn enqueue(&self, endpoint: &str, payload: Value) -> Result<String, QueueError> {
        let id = {
            let mut items = self.lock();
            let mut item = QueueItem::new(endpoint, payload);
            while items.iter().any(|existing| existing.id == item.id) {
                item = QueueItem::new(endpoint, item.payload);
            }
            let id = item.id.clone();

            let mut next = items.clone();
            next.push(item);
            self.commit(&mut items, next)?;
            info!(id = %id, endpoint, queued = items.len(), "Queued call for replay");
            id
        };

        if let Some((ref registry, ref tag)) = self.sync {
            registry.register(tag);
        }
        Ok(id)
    }

    /// Empty the queue. Only for explicit resets; replay never clears.
    pub fn clear(&self) -> Result<(), QueueError> {
        let mut items = self.lock();
        self.commit(&mut items, Vec::new())?;
        info!("Cleared offline queue");
        Ok(())
    }

    /// Re-send every queued call in FIFO order.
    ///
    /// No-op while offline. Delivered items are removed and their results
    /// collected; failed items stay where they were, in their original
    /// relative order. The remaining queue is persisted after the pass.
    pub async fn replay(&self) -> Result<ReplayReport, QueueError> {
        if !self.connectivity.is_online() {
            debug!("Offline, skipping queue replay");
            return Ok(ReplayReport {
                remaining: self.len(),
                skipped_offline: true,
                ..Default::default()
            });
        }

        let snapshot = self.items();
        info!(items = snapshot.len(), "Replaying offline queue");

        let mut report = ReplayReport::default();
        for item in &snapshot {
            match self.send(&item.endpoint, &item.payload).await {
                Ok(result) => {
                    debug!(id = %item.id, "Replayed queued call");
                    report.delivered.push(DeliveredItem {
                        id: item.id.clone(),
                        result,
                    });
                }
                Err(e) => {
                    warn!(id = %item.id, endpoint = %item.endpoint, error = %e, "Replay failed, keeping item");
                    report.failed += 1;
                }
            }
        }

        let delivered: HashSet<&str> = report.delivered.iter().map(|d| d.id.as_str()).collect();
        {
            let mut items = self.lock();
            let next: Vec<QueueItem> = items
                .iter()
                .filter(|item| !delivered.contains(item.id.as_str()))
                .cloned()
                .collect();
            self.commit(&mut items, next)?;
            report.remaining = items.len();
        }

        info!(
            delivered = report.delivered.len(),
            failed = report.failed,
            remaining = report.remaining,
            "Queue replay finished"
        );
        Ok(report)
    }

    /// Send now if online, otherwise queue.
    ///
    /// A call that fails to reach the server while nominally online is queued
    /// too, and the failure is still returned as `QueueError::Deferred`. An
    /// error status from a reachable server is returned without queueing.
    pub async fn submit(&self, endpoint: &str, payload: Value) -> Result<SubmitOutcome, QueueError> {
        if !self.connectivity.is_online() {
            let id = self.enqueue(endpoint, payload)?;
            self.toast_info(QUEUED_MESSAGE);
            return Ok(SubmitOutcome::Queued { id });
        }

        match self.send(endpoint, &payload).await {
            Ok(body) => Ok(SubmitOutcome::Delivered(body)),
            Err(e) if e.is_network() => {
                let id = self.enqueue(endpoint, payload)?;
                self.toast_warning(QUEUED_AFTER_FAILURE_MESSAGE);
                Err(QueueError::Deferred { id, source: e })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Validate a prediction request and submit it.
    pub async fn submit_prediction(
        &self,
        endpoint: &str,
        request: &PredictionRequest,
    ) -> Result<SubmitOutcome, QueueError> {
        request.validate().map_err(QueueError::InvalidPayload)?;
        let payload = serde_json::to_value(request)?;
        self.submit(endpoint, payload).await
    }

    /// POST `payload` as JSON. Success means a 2xx answer; its body is
    /// returned as JSON (`null` if it is not JSON).
    async fn send(&self, endpoint: &str, payload: &Value) -> Result<Value, FetchError> {
        let url = self
            .origin
            .join(endpoint)
            .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", endpoint, e)))?;
        let request = Request::post_json(url, payload)?;
        let response = self.transport.fetch(&request).await?;
        if !response.ok() {
            return Err(FetchError::from_status(response.status, &response.text()));
        }
        Ok(response.parse_json().unwrap_or(Value::Null))
    }

    fn toast_info(&self, message: &str) {
        if let Some(ref notifier) = self.notifier {
            notifier.info(message);
        }
    }

    fn toast_warning(&self, message: &str) {
        if let Some(ref notifier) = self.notifier {
            notifier.warning(message);
        }
    }
}
