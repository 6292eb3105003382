//! User-facing notifications.
//!
//! Two independent channels:
//! - toasts (info/success/warning) that expire after a fixed short TTL
//! - the "update available" prompt, which stays until accepted or dismissed
//!
//! The UI layer subscribes to [`UiEvent`]s; the center also keeps the
//! current state so late subscribers can render it.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::models::{PushNotification, PUSH_TITLE};

/// Buffer size for the UI event channel.
/// Slow subscribers lag (and skip) rather than block the worker.
const UI_EVENT_BUFFER_SIZE: usize = 64;

const UPDATE_PROMPT_MESSAGE: &str = "New version available!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct Toast {
    pub id: u64,
    pub message: String,
    pub kind: NotificationKind,
    pub shown_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Toast {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct UpdatePrompt {
    /// Version waiting to take over.
    pub version: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    Toast(Toast),
    ToastDismissed { id: u64 },
    UpdateAvailable(UpdatePrompt),
    UpdatePromptClosed { accepted: bool },
    Push { title: String, notification: PushNotification },
}

#[derive(Debug, Default)]
struct CenterState {
    next_id: u64,
    toasts: Vec<Toast>,
    prompt: Option<UpdatePrompt>,
}

pub struct NotificationCenter {
    ttl: chrono::Duration,
    state: Mutex<CenterState>,
    events: broadcast::Sender<UiEvent>,
}

impl NotificationCenter {
    pub fn new(ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(UI_EVENT_BUFFER_SIZE);
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(3)),
            state: Mutex::default(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, CenterState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn emit(&self, event: UiEvent) {
        if self.events.send(event).is_err() {
            debug!("No UI subscribers for notification");
        }
    }

    /// Show an ephemeral toast. Returns its id.
    pub fn notify(&self, message: impl Into<String>, kind: NotificationKind) -> u64 {
        self.notify_at(message, kind, Utc::now())
    }

    pub fn notify_at(&self, message: impl Into<String>, kind: NotificationKind, now: DateTime<Utc>) -> u64 {
        let toast = {
            let mut state = self.lock();
            state.next_id += 1;
            let toast = Toast {
                id: state.next_id,
                message: message.into(),
                kind,
                shown_at: now,
                expires_at: now + self.ttl,
            };
            state.toasts.push(toast.clone());
            toast
        };
        info!(kind = ?toast.kind, message = %toast.message, "Notification");
        let id = toast.id;
        self.emit(UiEvent::Toast(toast));
        id
    }

    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.notify(message, NotificationKind::Info)
    }

    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.notify(message, NotificationKind::Success)
    }

    pub fn warning(&self, message: impl Into<String>) -> u64 {
        self.notify(message, NotificationKind::Warning)
    }

    /// Toasts still visible at `now`.
    pub fn active_toasts_at(&self, now: DateTime<Utc>) -> Vec<Toast> {
        self.lock()
            .toasts
            .iter()
            .filter(|t| !t.is_expired(now))
            .cloned()
            .collect()
    }

    pub fn active_toasts(&self) -> Vec<Toast> {
        self.active_toasts_at(Utc::now())
    }

    /// Drop expired toasts, announcing each dismissal. The update prompt is
    /// never affected. Returns how many toasts were dismissed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<u64> = {
            let mut state = self.lock();
            let (expired, live): (Vec<Toast>, Vec<Toast>) =
                std::mem::take(&mut state.toasts).into_iter().partition(|t| t.is_expired(now));
            state.toasts = live;
            expired.into_iter().map(|t| t.id).collect()
        };
        for id in &expired {
            self.emit(UiEvent::ToastDismissed { id: *id });
        }
        expired.len()
    }

    pub fn prune_expired(&self) -> usize {
        self.prune(Utc::now())
    }

    /// Raise the persistent update prompt. Returns false if one is already
    /// showing.
    pub fn show_update_prompt(&self, version: &str) -> bool {
        let prompt = {
            let mut state = self.lock();
            if state.prompt.is_some() {
                return false;
            }
            let prompt = UpdatePrompt {
                version: version.to_string(),
                message: UPDATE_PROMPT_MESSAGE.to_string(),
            };
            state.prompt = Some(prompt.clone());
            prompt
        };
        info!(version = %prompt.version, "Update available");
        self.emit(UiEvent::UpdateAvailable(prompt));
        true
    }

    pub fn update_prompt(&self) -> Option<UpdatePrompt> {
        self.lock().prompt.clone()
    }

    /// Close the prompt after the user chose. Returns the prompt that was
    /// showing, if any.
    pub fn close_update_prompt(&self, accepted: bool) -> Option<UpdatePrompt> {
        let closed = self.lock().prompt.take();
        if closed.is_some() {
            self.emit(UiEvent::UpdatePromptClosed { accepted });
        }
        closed
    }

    pub fn show_push(&self, notification: PushNotification) {
        info!(body = %notification.body, "Showing push notification");
        self.emit(UiEvent::Push {
            title: PUSH_TITLE.to_string(),
            notification,
        });
    }
}
