//! # media-dl
//!
//! Interruptible, crash-safe media download orchestration.
//!
//! ## Design Philosophy
//!
//! media-dl is designed to be:
//! - **Bounded** - At most `max_concurrent_downloads` transfers run at once; the rest wait
//!   in submission order
//! - **Interruptible** - Every task can be paused, resumed, aborted or deleted while it runs
//! - **Crash-safe** - The task store is persisted on every mutation and reconciled on start
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! The transfer itself is delegated to a [`FetchEngine`]; [`YtDlpEngine`] drives the
//! `yt-dlp` binary.
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_dl::{Config, MediaDownloader, NewTask};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = MediaDownloader::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     downloader
//!         .submit(NewTask::new("https://www.youtube.com/watch?v=dQw4w9WgXcQ").quality("720"))
//!         .await?;
//!
//!     media_dl::run_with_shutdown(downloader).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Configuration types
pub mod config;
/// Task orchestration (admission, workers, control, lifecycle)
pub mod downloader;
/// Fetch engine abstraction and the yt-dlp adapter
pub mod engine;
/// Error types
pub mod error;
/// Connectivity health probing
pub mod health;
/// Staging area and artifact finalization
pub mod staging;
/// Persistent task store
pub mod store;
/// Thumbnail caching
pub mod thumbnail;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use downloader::{Components, MediaDownloader};
pub use engine::{FetchEngine, FetchOutcome, FetchRequest, ProgressEvent, YtDlpEngine};
pub use error::{ApiError, Error, ErrorDetail, FetchError, Result, TaskError, ToHttpStatus};
pub use health::{ConnectivityProbe, HttpProbe};
pub use store::{JsonFilePersistence, MemoryPersistence, TaskPersistence, TaskStore};
pub use thumbnail::{HttpThumbnailFetcher, ThumbnailFetcher};
pub use types::{
    Detection, Event, MediaMetadata, NewTask, PlaylistEntry, QueueStats, Status, StreamKind,
    Task, TaskAction, TaskId, TaskView,
};

/// Helper function to run the downloader with graceful signal handling.
///
/// Waits for a termination signal and then calls the downloader's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use media_dl::{MediaDownloader, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let downloader = MediaDownloader::new(config).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(downloader).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: MediaDownloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
