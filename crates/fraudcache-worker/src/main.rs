//! fraudcache worker.
//!
//! Composition root: builds every service explicitly, installs and activates
//! the configured cache version, then watches connectivity. The page shell
//! talks to it over stdio: UI events go out as JSON lines on stdout, and
//! commands (`update`, `later`, `push [text]`, `predict <model> <values>`,
//! `fetch <GET|POST> <url> [document | <json body>]`) come in on stdin.

mod command;

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fraudcache_core::cache::{CacheManager, DiskCacheStorage};
use fraudcache_core::http::{ConnectivityFlag, Destination, HttpTransport, Method, Request, Transport};
use fraudcache_core::intercept::FetchInterceptor;
use fraudcache_core::models::PredictionRequest;
use fraudcache_core::notify::NotificationCenter;
use fraudcache_core::queue::{FileQueueBackend, OfflineQueue};
use fraudcache_core::sync::{SyncCoordinator, SyncRegistry, VersionState, WorkerEvent, WorkerRuntime, WorkerServices};
use fraudcache_core::Config;

use command::Command;

const LOG_FILE_PREFIX: &str = "fraudcache-worker.log";

/// Endpoint predictions are posted to.
const PREDICT_ENDPOINT: &str = "/predict";

/// Initialize logging to stderr and a daily log file in the cache directory.
/// The returned guard flushes the file writer on drop.
fn init_tracing(log_dir: &Path) -> WorkerGuard {
    // RUST_LOG overrides the default (e.g., RUST_LOG=fraudcache=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,fraudcache=info"));

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .with(filter)
        .init();

    guard
}

struct Worker {
    runtime: WorkerRuntime,
    transport: Arc<HttpTransport>,
    registry: Arc<SyncRegistry>,
}

/// Wire the services for `config`.
fn build(config: &Config) -> Result<Worker> {
    let cache_dir = config.cache_dir()?;
    let origin = config.origin_url().context("Invalid origin")?;

    let transport = Arc::new(HttpTransport::new(origin.clone())?);
    let dyn_transport: Arc<dyn Transport> = transport.clone();
    let connectivity = ConnectivityFlag::default();
    let notifier = Arc::new(NotificationCenter::new(config.notification_ttl()));
    let registry = Arc::new(SyncRegistry::new());

    let storage = Arc::new(DiskCacheStorage::new(cache_dir.clone())?);
    let cache = Arc::new(CacheManager::new(storage, dyn_transport.clone()));
    let interceptor = Arc::new(FetchInterceptor::new(cache.clone(), dyn_transport.clone(), config)?);

    let queue = OfflineQueue::open(
        Arc::new(FileQueueBackend::new(cache_dir)),
        dyn_transport,
        Arc::new(connectivity.clone()),
        origin,
    )?
    .with_notifications(notifier.clone())
    .with_sync(registry.clone(), config.sync_tag.clone());

    let services = WorkerServices {
        cache,
        interceptor,
        queue: Arc::new(queue),
        notifier,
        connectivity,
    };
    let coordinator = SyncCoordinator::open(services, config)?;

    Ok(Worker {
        runtime: WorkerRuntime::new(Arc::new(coordinator)),
        transport,
        registry,
    })
}

/// Forward UI events to the page shell as JSON lines.
fn spawn_ui_bridge(notifier: &NotificationCenter) {
    let mut events = notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!(error = %e, "Failed to encode UI event"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "UI bridge fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

impl Worker {
    /// Install, then activate unless an older version still controls the
    /// pages (activation then waits for the user to accept the update).
    /// A version activated by an earlier run is left as it is.
    async fn start(&self) -> Result<()> {
        let coordinator = self.runtime.coordinator();
        if coordinator.state() == VersionState::Activated {
            return Ok(());
        }

        let installed = self.runtime.dispatch(WorkerEvent::Install).await;
        if let Some(e) = installed.first_error() {
            // The older version keeps serving from its own tiers
            if let Some(previous) = coordinator.previous() {
                error!(error = %format!("{:#}", e), previous = %previous, "Update failed to install");
                return Ok(());
            }
            return Err(anyhow::anyhow!("{:#}", e)).context("Installation failed");
        }

        if coordinator.is_waiting() {
            info!("Update installed, waiting for the user to accept it");
            return Ok(());
        }

        let activated = self.runtime.dispatch(WorkerEvent::Activate).await;
        if let Some(e) = activated.first_error() {
            error!(error = %format!("{:#}", e), "Activation failed");
        }
        Ok(())
    }

    /// Probe the origin, announce any change and run pending syncs.
    async fn tick(&self) {
        let online = self.transport.probe().await;
        let dispatched = self.runtime.dispatch(WorkerEvent::Connectivity { online }).await;
        if !dispatched.settled.is_empty() {
            debug!(online, "Connectivity change handled");
        }

        if online {
            for tag in self.registry.take_pending() {
                self.runtime.dispatch(WorkerEvent::Sync { tag }).await;
            }
        }

        self.runtime.coordinator().services().notifier.prune_expired();
    }

    async fn run_command(&self, command: Command) {
        match command {
            Command::Update { accepted } => {
                self.runtime
                    .dispatch(WorkerEvent::UpdatePromptResponse { accepted })
                    .await;
            }
            Command::Push { text } => {
                self.runtime.dispatch(WorkerEvent::Push { text }).await;
            }
            Command::Predict { model, features } => {
                let queue = &self.runtime.coordinator().services().queue;
                let request = PredictionRequest::new(features, model);
                match queue.submit_prediction(PREDICT_ENDPOINT, &request).await {
                    Ok(outcome) => println!("{}", outcome.to_json()),
                    Err(e) => warn!(error = &e as &dyn std::error::Error, "Prediction failed"),
                }
            }
            Command::Fetch {
                method,
                target,
                document,
                body,
            } => match self.fetch_request(method, &target, document, body) {
                Ok(request) => {
                    let url = request.url.to_string();
                    let dispatched = self.runtime.dispatch(WorkerEvent::Fetch(request)).await;
                    let line = match dispatched.response {
                        Some(Ok(response)) => serde_json::json!({
                            "url": url,
                            "status": response.status,
                            "type": response.response_type,
                            "body": response.text(),
                        }),
                        Some(Err(e)) => serde_json::json!({ "url": url, "error": e.to_string() }),
                        None => serde_json::json!({ "url": url, "error": "no response" }),
                    };
                    println!("{}", line);
                }
                Err(e) => warn!(error = %format!("{:#}", e), target = %target, "Ignoring fetch"),
            },
        }
    }

    /// Resolve `target` against the origin; absolute URLs pass through.
    fn fetch_request(
        &self,
        method: Method,
        target: &str,
        document: bool,
        body: Option<serde_json::Value>,
    ) -> Result<Request> {
        let url = self
            .transport
            .origin()
            .join(target)
            .with_context(|| format!("Invalid URL: {}", target))?;
        let mut request = match body {
            Some(body) => Request::post_json(url, &body)?,
            None => Request::new(method, url),
        };
        if document {
            request.destination = Destination::Document;
        }
        Ok(request)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::load()?;
    let cache_dir = config.cache_dir()?;
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("Failed to create cache directory: {}", cache_dir.display()))?;

    let _guard = init_tracing(&cache_dir);
    info!(version = %config.version, origin = %config.origin, "fraudcache worker starting");

    let worker = build(&config)?;
    spawn_ui_bridge(&worker.runtime.coordinator().services().notifier);
    worker.start().await?;

    let mut ticker = tokio::time::interval(config.probe_interval());
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => worker.tick().await,
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match command::parse(&line) {
                    Ok(Some(command)) => worker.run_command(command).await,
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Ignoring command"),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("fraudcache worker shutting down");
    Ok(())
}
