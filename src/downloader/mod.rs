//! Core downloader implementation split into focused submodules.
//!
//! The `MediaDownloader` struct and its methods are organized by domain:
//! - [`submit`] - Task submission, URL detection and playlist listing
//! - [`queue`] - Admission control and startup queue restoration
//! - [`control`] - Task lifecycle control (pause/resume/abort/delete, bulk variants)
//! - [`worker`] - Per-task fetch execution and outcome reconciliation
//! - [`progress`] - Progress reporting and cooperative cancellation checkpoints
//! - [`lifecycle`] - Graceful shutdown
//! - [`services`] - Background services (connectivity health monitor)

mod control;
mod lifecycle;
mod progress;
mod queue;
mod services;
mod submit;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::engine::{FetchEngine, YtDlpEngine};
use crate::error::{Error, Result};
use crate::health::{ConnectivityProbe, HttpProbe};
use crate::staging::StagingArea;
use crate::store::{JsonFilePersistence, TaskPersistence, TaskStore};
use crate::thumbnail::{HttpThumbnailFetcher, ThumbnailFetcher};
use crate::types::{Event, TaskId};

/// Map of running workers to their cancellation tokens
pub(crate) type ActiveWorkers = Arc<std::sync::Mutex<HashMap<TaskId, CancellationToken>>>;

/// Worker pool bookkeeping
#[derive(Clone)]
pub(crate) struct QueueState {
    /// Cancellation token of every task that currently has a worker.
    /// Locked after the store lock, never held across `.await`.
    pub(crate) active_workers: ActiveWorkers,
    /// Flag to indicate whether new work is accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            active_workers: Arc::new(std::sync::Mutex::new(HashMap::new())),
            accepting_new: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Lock the active map, recovering from a poisoned lock
    pub(crate) fn active(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<TaskId, CancellationToken>> {
        self.active_workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }
}

/// Long-lived background services
#[derive(Clone)]
pub(crate) struct ServiceState {
    /// Cancelled on shutdown to stop every service loop
    pub(crate) token: CancellationToken,
    /// Probe used by the health monitor (`None` when health checks are disabled)
    pub(crate) probe: Option<Arc<dyn ConnectivityProbe>>,
    /// Handle of the running health monitor, joined on shutdown
    pub(crate) health_handle: Arc<std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

/// Pluggable collaborators for [`MediaDownloader::with_components`]
pub struct Components {
    /// Metadata resolution and byte transfer
    pub engine: Arc<dyn FetchEngine>,
    /// Preview image fetching
    pub thumbnails: Arc<dyn ThumbnailFetcher>,
    /// Durable storage for the task map
    pub persistence: Arc<dyn TaskPersistence>,
    /// Connectivity probe for the health monitor
    pub probe: Option<Arc<dyn ConnectivityProbe>>,
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct MediaDownloader {
    /// Task record store, the single source of truth for task state
    pub(crate) store: Arc<TaskStore>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Fetch engine shared by every worker
    pub(crate) engine: Arc<dyn FetchEngine>,
    /// Thumbnail fetcher
    pub(crate) thumbnails: Arc<dyn ThumbnailFetcher>,
    /// Per-task namespaced temp directory
    pub(crate) staging: StagingArea,
    /// Worker pool bookkeeping
    pub(crate) queue_state: QueueState,
    /// Background services
    pub(crate) services: ServiceState,
}

impl MediaDownloader {
    /// Create a new MediaDownloader instance
    ///
    /// This initializes all core components:
    /// - Validates the configuration and creates the working directories
    /// - Locates the `yt-dlp` binary
    /// - Loads the persisted task map and restores the queue
    /// - Sets up the event broadcast channel
    pub async fn new(config: Config) -> Result<Self> {
        let engine = YtDlpEngine::from_config(&config.tools)?;
        tracing::info!(
            engine = engine.name(),
            binary = ?engine.binary_path(),
            "Fetch engine initialized"
        );

        let probe: Option<Arc<dyn ConnectivityProbe>> = if config.health.enabled {
            Some(Arc::new(HttpProbe::new(
                config.health.probe_url.clone(),
                config.health.timeout,
            )?))
        } else {
            None
        };

        let components = Components {
            engine: Arc::new(engine),
            thumbnails: Arc::new(HttpThumbnailFetcher::new()?),
            persistence: Arc::new(JsonFilePersistence::new(
                config.persistence.tasks_path.clone(),
            )),
            probe,
        };

        Self::with_components(config, components).await
    }

    /// Create a MediaDownloader with explicit collaborators
    ///
    /// Used by tests and embedders that bring their own engine or storage.
    pub async fn with_components(config: Config, components: Components) -> Result<Self> {
        config.validate()?;

        for (dir, what) in [
            (config.download_dir(), "download"),
            (config.temp_dir(), "temp"),
            (config.thumbnail_dir(), "thumbnail"),
        ] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create {} directory '{}': {}",
                        what,
                        dir.display(),
                        e
                    ),
                ))
            })?;
        }

        let store = TaskStore::open(components.persistence).await;

        // Create broadcast channel with buffer size of 1000 events
        // This allows multiple subscribers to receive all events independently
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        let staging = StagingArea::new(config.temp_dir().clone());

        let downloader = Self {
            store: Arc::new(store),
            event_tx,
            config: Arc::new(config),
            engine: components.engine,
            thumbnails: components.thumbnails,
            staging,
            queue_state: QueueState::new(),
            services: ServiceState {
                token: CancellationToken::new(),
                probe: components.probe,
                health_handle: Arc::new(std::sync::Mutex::new(None)),
            },
        };

        // Restore any unfinished tasks from the previous session
        downloader.restore_queue().await;

        Ok(downloader)
    }

    /// Subscribe to task events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// Events are buffered, but if a subscriber falls behind by more than 1000 events,
    /// it will receive a `RecvError::Lagged` error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use media_dl::{MediaDownloader, Config};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let downloader = MediaDownloader::new(Config::default()).await?;
    ///
    ///     let mut events = downloader.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             tracing::info!(?event, "task event");
    ///         }
    ///     });
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Spawn the REST API server in a background task
    ///
    /// The server listens on `config.server.api.bind_address` and shares this
    /// downloader's state.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use media_dl::{MediaDownloader, Config};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let downloader = MediaDownloader::new(Config::default()).await?;
    ///     let api_handle = downloader.spawn_api_server();
    ///
    ///     media_dl::run_with_shutdown(downloader).await?;
    ///     api_handle.abort();
    ///     Ok(())
    /// }
    /// ```
    pub fn spawn_api_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let downloader = Arc::new(self.clone());
        let config = self.get_config();

        tokio::spawn(async move { crate::api::start_api_server(downloader, config).await })
    }
}
