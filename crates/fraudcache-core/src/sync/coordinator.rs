//! Event handlers for the worker.
//!
//! [`SyncCoordinator::handle`] maps each [`WorkerEvent`] to an
//! [`EventAction`] without doing any I/O itself. Both replay triggers
//! (reconnect and background sync) end in the same [`OfflineQueue::replay`]
//! call and are not serialised against each other.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, info, warn};
use url::Url;

use super::event::{EventAction, LifetimeExtension, WorkerEvent};
use super::lifecycle::{previous_version, Lifecycle, VersionState};
use crate::cache::{CacheManager, TierName};
use crate::config::Config;
use crate::error::CacheError;
use crate::http::ConnectivityFlag;
use crate::intercept::FetchInterceptor;
use crate::models::PushNotification;
use crate::notify::NotificationCenter;
use crate::queue::OfflineQueue;

const BACK_ONLINE_MESSAGE: &str = "Back online!";
const OFFLINE_MESSAGE: &str = "You are offline. Some features may be limited.";

/// The services a coordinator drives, built by the composition root.
#[derive(Clone)]
pub struct WorkerServices {
    pub cache: Arc<CacheManager>,
    pub interceptor: Arc<FetchInterceptor>,
    pub queue: Arc<OfflineQueue>,
    pub notifier: Arc<NotificationCenter>,
    pub connectivity: ConnectivityFlag,
}

pub struct SyncCoordinator {
    services: WorkerServices,
    lifecycle: Arc<Mutex<Lifecycle>>,
    static_tier: TierName,
    retained: Vec<TierName>,
    assets: Arc<Vec<Url>>,
    sync_tag: String,
}

impl SyncCoordinator {
    /// `previous` is the version controlling the pages, if any (see
    /// [`super::previous_version`]). Page traffic goes through its tiers
    /// until this version activates.
    pub fn new(services: WorkerServices, config: &Config, previous: Option<String>) -> Result<Self, CacheError> {
        if let Some(ref previous) = previous {
            services.interceptor.serve_version(previous);
        }
        Self::with_lifecycle(services, config, Lifecycle::new(config.version.clone(), previous))
    }

    /// Pick up where an earlier run left the cache. A static tier for the
    /// configured version with no older one beside it means that version was
    /// already activated, so it resumes control without reinstalling.
    pub fn open(services: WorkerServices, config: &Config) -> Result<Self, CacheError> {
        let previous = previous_version(&services.cache.tier_names()?, &config.version);
        match previous {
            None if services.cache.has_tier(&config.static_tier())? => {
                info!(version = %config.version, "Resuming activated version");
                Self::with_lifecycle(services, config, Lifecycle::resumed(config.version.clone()))
            }
            Some(previous) => {
                info!(previous = %previous, current = %config.version, "Older version controls the pages");
                Self::new(services, config, Some(previous))
            }
            None => Self::new(services, config, None),
        }
    }

    fn with_lifecycle(services: WorkerServices, config: &Config, lifecycle: Lifecycle) -> Result<Self, CacheError> {
        let assets = config.asset_urls()?;
        Ok(Self {
            services,
            lifecycle: Arc::new(Mutex::new(lifecycle)),
            static_tier: config.static_tier(),
            retained: config.retained_tiers(),
            assets: Arc::new(assets),
            sync_tag: config.sync_tag.clone(),
        })
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        lock(&self.lifecycle)
    }

    pub fn state(&self) -> VersionState {
        self.lifecycle().state()
    }

    pub fn is_controlling(&self) -> bool {
        self.lifecycle().is_controlling()
    }

    /// Version that still controls the pages while this one waits.
    pub fn previous(&self) -> Option<String> {
        self.lifecycle().previous().map(str::to_string)
    }

    /// Installed but held back until the user accepts the update.
    pub fn is_waiting(&self) -> bool {
        self.lifecycle().is_waiting()
    }

    pub fn services(&self) -> &WorkerServices {
        &self.services
    }

    pub fn handle(&self, event: WorkerEvent) -> EventAction {
        debug!(event = event.name(), "Handling worker event");
        match event {
            WorkerEvent::Install => self.on_install(),
            WorkerEvent::Activate => self.on_activate(),
            WorkerEvent::Fetch(request) => {
                let interceptor = Arc::clone(&self.services.interceptor);
                EventAction::respond_with(async move { interceptor.handle(&request).await })
            }
            WorkerEvent::Sync { tag } => {
                if tag == self.sync_tag {
                    EventAction::wait_until(self.replay_extension())
                } else {
                    debug!(tag = %tag, "Ignoring sync event for unknown tag");
                    EventAction::none()
                }
            }
            WorkerEvent::Push { text } => {
                let notifier = Arc::clone(&self.services.notifier);
                EventAction::wait_until(LifetimeExtension::new("push", async move {
                    notifier.show_push(PushNotification::from_push(text.as_deref(), Utc::now()));
                    Ok(())
                }))
            }
            WorkerEvent::Connectivity { online } => self.on_connectivity(online),
            WorkerEvent::UpdatePromptResponse { accepted } => {
                self.services.notifier.close_update_prompt(accepted);
                if accepted {
                    info!("Update accepted, activating waiting version");
                    self.on_activate()
                } else {
                    debug!("Update postponed");
                    EventAction::none()
                }
            }
        }
    }

    fn on_install(&self) -> EventAction {
        let state = self.state();
        if state != VersionState::Installing {
            warn!(state = %state, "Ignoring install event");
            return EventAction::none();
        }

        let cache = Arc::clone(&self.services.cache);
        let notifier = Arc::clone(&self.services.notifier);
        let lifecycle = Arc::clone(&self.lifecycle);
        let tier = self.static_tier.clone();
        let assets = Arc::clone(&self.assets);

        EventAction::wait_until(LifetimeExtension::new("precache", async move {
            match cache.precache(&tier, &assets).await {
                Ok(count) => {
                    let mut lifecycle = lock(&lifecycle);
                    lifecycle.advance(VersionState::Installed)?;
                    info!(version = lifecycle.version(), assets = count, "Version installed");
                    if lifecycle.is_waiting() {
                        notifier.show_update_prompt(lifecycle.version());
                    }
                    Ok(())
                }
                Err(e) => {
                    lock(&lifecycle).advance(VersionState::Redundant)?;
                    Err(e).with_context(|| format!("Failed to precache {}", tier))
                }
            }
        }))
    }

    fn on_activate(&self) -> EventAction {
        // Claim the transition up front so a second activate is ignored.
        if let Err(e) = self.lifecycle().advance(VersionState::Activating) {
            warn!(error = %e, "Ignoring activate event");
            return EventAction::none();
        }

        let cache = Arc::clone(&self.services.cache);
        let interceptor = Arc::clone(&self.services.interceptor);
        let lifecycle = Arc::clone(&self.lifecycle);
        let retained = self.retained.clone();

        EventAction::wait_until(LifetimeExtension::new("reconcile", async move {
            match cache.reconcile(&retained) {
                Ok(deleted) => {
                    let mut lifecycle = lock(&lifecycle);
                    lifecycle.advance(VersionState::Activated)?;
                    interceptor.serve_version(lifecycle.version());
                    info!(
                        version = lifecycle.version(),
                        purged = ?deleted,
                        "Version activated, controlling pages"
                    );
                    Ok(())
                }
                Err(e) => {
                    lock(&lifecycle).advance(VersionState::Installed)?;
                    Err(e).context("Failed to purge stale cache tiers")
                }
            }
        }))
    }

    fn on_connectivity(&self, online: bool) -> EventAction {
        if !self.services.connectivity.set(online) {
            return EventAction::none();
        }

        if online {
            info!("Connectivity restored");
            self.services.notifier.success(BACK_ONLINE_MESSAGE);
            EventAction::wait_until(self.replay_extension())
        } else {
            info!("Connectivity lost");
            self.services.notifier.warning(OFFLINE_MESSAGE);
            EventAction::none()
        }
    }

    fn replay_extension(&self) -> LifetimeExtension {
        let queue = Arc::clone(&self.services.queue);
        LifetimeExtension::new("replay", async move {
            let report = queue.replay().await.context("Queue replay failed")?;
            if !report.skipped_offline {
                debug!(
                    delivered = report.delivered.len(),
                    remaining = report.remaining,
                    "Replay pass complete"
                );
            }
            Ok(())
        })
    }
}

fn lock(lifecycle: &Mutex<Lifecycle>) -> MutexGuard<'_, Lifecycle> {
    lifecycle.lock().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, MemoryCacheStorage, TierKind};
    use crate::http::{Request, Transport};
    use crate::notify::{NotificationKind, UiEvent};
    use crate::queue::MemoryQueueBackend;
    use crate::test_support::{origin, response, url, StubTransport, ORIGIN};
    use std::time::Duration;

    fn config() -> Config {
        Config {
            origin: ORIGIN.to_string(),
            version: "2".to_string(),
            precache_assets: vec!["/".into(), "/model.html".into(), "/static/js/script.js".into()],
            ..Config::default()
        }
    }

    struct Fixture {
        coordinator: SyncCoordinator,
        transport: Arc<StubTransport>,
    }

    fn services(storage: Arc<MemoryCacheStorage>, transport: Arc<StubTransport>, online: bool) -> WorkerServices {
        let config = config();
        let dyn_transport: Arc<dyn Transport> = transport;
        let connectivity = ConnectivityFlag::new(online);
        let cache = Arc::new(CacheManager::new(storage, dyn_transport.clone()));
        let interceptor = Arc::new(FetchInterceptor::new(cache.clone(), dyn_transport.clone(), &config).unwrap());
        let queue = Arc::new(
            OfflineQueue::open(
                Arc::new(MemoryQueueBackend::new()),
                dyn_transport,
                Arc::new(connectivity.clone()),
                origin(),
            )
            .unwrap(),
        );
        WorkerServices {
            cache,
            interceptor,
            queue,
            notifier: Arc::new(NotificationCenter::new(Duration::from_secs(3))),
            connectivity,
        }
    }

    fn fixture(transport: StubTransport, online: bool, previous: Option<&str>) -> Fixture {
        let transport = Arc::new(transport);
        let services = services(Arc::new(MemoryCacheStorage::new()), transport.clone(), online);
        let coordinator = SyncCoordinator::new(services, &config(), previous.map(str::to_string)).unwrap();
        Fixture { coordinator, transport }
    }

    async fn settle(action: EventAction) -> Vec<anyhow::Result<()>> {
        let mut results = Vec::new();
        for extension in action.wait_until {
            results.push(extension.settle().await);
        }
        results
    }

    #[tokio::test]
    async fn test_handle_performs_no_io() {
        let f = fixture(StubTransport::serving_everything(), true, None);
        let action = f.coordinator.handle(WorkerEvent::Install);
        assert_eq!(action.labels(), vec!["precache"]);
        assert_eq!(f.transport.call_count(), 0);
        assert_eq!(f.coordinator.state(), VersionState::Installing);
        drop(action);
    }

    #[tokio::test]
    async fn test_install_then_activate() {
        let f = fixture(StubTransport::serving_everything(), true, None);
        let cache = &f.coordinator.services().cache;
        let old = url("/old");
        cache
            .store(&TierName::new(TierKind::Dynamic, "1"), CacheKey::get(&old), &response(&old, 200, "old"))
            .unwrap();

        for result in settle(f.coordinator.handle(WorkerEvent::Install)).await {
            result.unwrap();
        }
        assert_eq!(f.coordinator.state(), VersionState::Installed);
        assert!(!f.coordinator.is_waiting());
        assert!(f.coordinator.services().notifier.update_prompt().is_none());
        assert_eq!(cache.entry_count(&TierName::new(TierKind::Static, "2")).unwrap(), 3);

        for result in settle(f.coordinator.handle(WorkerEvent::Activate)).await {
            result.unwrap();
        }
        assert_eq!(f.coordinator.state(), VersionState::Activated);
        assert!(f.coordinator.is_controlling());
        assert_eq!(cache.tier_names().unwrap(), vec!["static-v2".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_precache_makes_version_redundant() {
        let f = fixture(StubTransport::failing_paths(&["/model.html"]), true, None);
        let results = settle(f.coordinator.handle(WorkerEvent::Install)).await;
        assert!(results[0].is_err());
        assert_eq!(f.coordinator.state(), VersionState::Redundant);
        assert!(!f.coordinator.services().cache.has_tier(&TierName::new(TierKind::Static, "2")).unwrap());

        assert!(f.coordinator.handle(WorkerEvent::Activate).is_empty());
        assert_eq!(f.coordinator.state(), VersionState::Redundant);
    }

    #[tokio::test]
    async fn test_update_prompt_when_previous_version_controls() {
        let f = fixture(StubTransport::serving_everything(), true, Some("1"));
        let mut ui = f.coordinator.services().notifier.subscribe();

        settle(f.coordinator.handle(WorkerEvent::Install)).await;
        assert!(f.coordinator.is_waiting());
        let prompt = f.coordinator.services().notifier.update_prompt().unwrap();
        assert_eq!(prompt.version, "2");
        assert!(matches!(ui.recv().await.unwrap(), UiEvent::UpdateAvailable(_)));

        // Toasts come and go without touching the prompt
        f.coordinator.services().notifier.prune(Utc::now() + chrono::Duration::seconds(60));
        assert!(f.coordinator.services().notifier.update_prompt().is_some());

        assert!(f.coordinator.handle(WorkerEvent::UpdatePromptResponse { accepted: false }).is_empty());
        assert_eq!(f.coordinator.state(), VersionState::Installed);
        assert!(f.coordinator.services().notifier.update_prompt().is_none());

        let action = f.coordinator.handle(WorkerEvent::UpdatePromptResponse { accepted: true });
        assert_eq!(action.labels(), vec!["reconcile"]);
        settle(action).await;
        assert_eq!(f.coordinator.state(), VersionState::Activated);
    }

    #[tokio::test]
    async fn test_second_activate_is_ignored() {
        let f = fixture(StubTransport::serving_everything(), true, None);
        settle(f.coordinator.handle(WorkerEvent::Install)).await;
        let first = f.coordinator.handle(WorkerEvent::Activate);
        assert!(f.coordinator.handle(WorkerEvent::Activate).is_empty());
        settle(first).await;
        assert!(f.coordinator.handle(WorkerEvent::Activate).is_empty());
    }

    #[tokio::test]
    async fn test_fetch_responds_through_interceptor() {
        let f = fixture(StubTransport::offline(), true, None);
        let action = f.coordinator.handle(WorkerEvent::Fetch(Request::get(url("/predict"))));
        assert!(action.wait_until.is_empty());
        let response = action.respond_with.unwrap().await.unwrap();
        assert_eq!(response.status, 200);
        let body: serde_json::Value = response.parse_json().unwrap();
        assert_eq!(body["error"], "Offline");
    }

    #[tokio::test]
    async fn test_sync_replays_only_for_registered_tag() {
        let f = fixture(StubTransport::serving_everything(), true, None);
        f.coordinator
            .services()
            .queue
            .enqueue("/predict", serde_json::json!({"features": [0.0], "model": "rf"}))
            .unwrap();

        let ignored = f.coordinator.handle(WorkerEvent::Sync { tag: "other".into() });
        assert!(ignored.is_empty());

        let action = f.coordinator.handle(WorkerEvent::Sync {
            tag: "background-prediction".into(),
        });
        for result in settle(action).await {
            result.unwrap();
        }
        assert!(f.coordinator.services().queue.is_empty());
        assert_eq!(f.transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_connectivity_toasts_and_replay() {
        let f = fixture(StubTransport::serving_everything(), false, None);
        let notifier = Arc::clone(&f.coordinator.services().notifier);
        f.coordinator
            .services()
            .queue
            .enqueue("/predict", serde_json::json!({"features": [1.0], "model": "xgb"}))
            .unwrap();

        // Unchanged state: nothing happens
        assert!(f.coordinator.handle(WorkerEvent::Connectivity { online: false }).is_empty());
        assert!(notifier.active_toasts().is_empty());

        let action = f.coordinator.handle(WorkerEvent::Connectivity { online: true });
        assert_eq!(action.labels(), vec!["replay"]);
        settle(action).await;
        assert!(f.coordinator.services().queue.is_empty());

        assert!(f.coordinator.handle(WorkerEvent::Connectivity { online: false }).is_empty());
        let toasts = notifier.active_toasts();
        assert_eq!(toasts.len(), 2);
        assert_eq!((toasts[0].message.as_str(), toasts[0].kind), (BACK_ONLINE_MESSAGE, NotificationKind::Success));
        assert_eq!((toasts[1].message.as_str(), toasts[1].kind), (OFFLINE_MESSAGE, NotificationKind::Warning));
    }

    #[tokio::test]
    async fn test_push_shows_alert() {
        let f = fixture(StubTransport::offline(), true, None);
        let mut ui = f.coordinator.services().notifier.subscribe();
        settle(f.coordinator.handle(WorkerEvent::Push { text: None })).await;
        match ui.recv().await.unwrap() {
            UiEvent::Push { title, notification } => {
                assert_eq!(title, "Fraud Detection Alert");
                assert_eq!(notification.body, "New fraud alert!");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_resumes_activated_version_offline() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let first = SyncCoordinator::open(
            services(storage.clone(), Arc::new(StubTransport::serving_everything()), true),
            &config(),
        )
        .unwrap();
        assert_eq!(first.state(), VersionState::Installing);
        settle(first.handle(WorkerEvent::Install)).await;
        settle(first.handle(WorkerEvent::Activate)).await;
        assert_eq!(first.state(), VersionState::Activated);

        // Restart with the same version and no network
        let transport = Arc::new(StubTransport::offline());
        let restarted = SyncCoordinator::open(services(storage, transport.clone(), false), &config()).unwrap();
        assert_eq!(restarted.state(), VersionState::Activated);
        assert!(restarted.is_controlling());
        assert!(!restarted.is_waiting());

        assert!(restarted.handle(WorkerEvent::Install).is_empty());
        assert!(restarted.handle(WorkerEvent::Activate).is_empty());
        assert_eq!(restarted.state(), VersionState::Activated);

        let page = restarted
            .handle(WorkerEvent::Fetch(Request::navigate(url("/model.html"))))
            .respond_with
            .unwrap()
            .await
            .unwrap();
        assert_eq!(page.body, b"body of /model.html");
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_open_installs_behind_older_version() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let services = services(storage, Arc::new(StubTransport::serving_everything()), true);
        let root = url("/");
        services
            .cache
            .store(&TierName::new(TierKind::Static, "1"), CacheKey::get(&root), &response(&root, 200, "v1 shell"))
            .unwrap();

        let coordinator = SyncCoordinator::open(services, &config()).unwrap();
        assert_eq!(coordinator.state(), VersionState::Installing);
        assert_eq!(coordinator.previous().as_deref(), Some("1"));
        assert_eq!(coordinator.services().interceptor.serving_version(), "1");
    }

    #[tokio::test]
    async fn test_waiting_version_does_not_serve_pages() {
        let f = fixture(StubTransport::serving_everything(), true, Some("1"));
        let cache = Arc::clone(&f.coordinator.services().cache);
        settle(f.coordinator.handle(WorkerEvent::Install)).await;
        assert!(f.coordinator.is_waiting());

        let script = url("/static/js/model.js");
        f.coordinator
            .handle(WorkerEvent::Fetch(Request::get(script.clone())))
            .respond_with
            .unwrap()
            .await
            .unwrap();
        let key = CacheKey::get(&script);
        assert!(cache.lookup(&TierName::new(TierKind::Dynamic, "1"), &key).unwrap().is_some());
        assert!(cache.lookup(&TierName::new(TierKind::Dynamic, "2"), &key).unwrap().is_none());

        settle(f.coordinator.handle(WorkerEvent::UpdatePromptResponse { accepted: true })).await;
        assert_eq!(f.coordinator.state(), VersionState::Activated);
        assert_eq!(f.coordinator.services().interceptor.serving_version(), "2");

        let style = url("/static/css/style.css");
        f.coordinator
            .handle(WorkerEvent::Fetch(Request::get(style.clone())))
            .respond_with
            .unwrap()
            .await
            .unwrap();
        assert!(cache
            .lookup(&TierName::new(TierKind::Dynamic, "2"), &CacheKey::get(&style))
            .unwrap()
            .is_some());
    }
}
