//! Common test utilities for media-dl integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use media_dl::engine::{ProgressSender, StagedArtifact};
use media_dl::{
    Components, Config, FetchEngine, FetchError, FetchOutcome, FetchRequest, HttpThumbnailFetcher,
    JsonFilePersistence, MediaDownloader, MediaMetadata, PlaylistEntry, ProgressEvent, QueueStats,
};

/// Engine that stages a file, then waits for a permit before reporting success
pub struct GatedEngine {
    gate: tokio::sync::Semaphore,
    started: AtomicUsize,
    thumbnail: Option<String>,
}

impl GatedEngine {
    pub fn new(thumbnail: Option<String>) -> Self {
        Self {
            gate: tokio::sync::Semaphore::new(0),
            started: AtomicUsize::new(0),
            thumbnail,
        }
    }

    /// Let `n` waiting fetches finish
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    fn metadata(&self, url: &str) -> MediaMetadata {
        let id = url.rsplit('=').next().unwrap_or("clip");
        MediaMetadata {
            title: format!("Clip {}", id),
            duration: Some(10.0),
            id: Some(id.to_string()),
            thumbnail: self.thumbnail.clone(),
            webpage_url: Some(url.to_string()),
        }
    }
}

#[async_trait]
impl FetchEngine for GatedEngine {
    async fn resolve(&self, url: &str) -> media_dl::Result<MediaMetadata> {
        Ok(self.metadata(url))
    }

    async fn playlist_entries(&self, _url: &str) -> media_dl::Result<Vec<PlaylistEntry>> {
        Ok(Vec::new())
    }

    async fn fetch(
        &self,
        request: FetchRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<FetchOutcome, FetchError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let staged = request.staging_dir.join(format!(
            "{}.{}",
            request.staging_stem,
            request.format.extension()
        ));
        tokio::fs::write(&staged, b"media bytes")
            .await
            .map_err(|e| FetchError::Failed(e.to_string()))?;
        progress
            .send(ProgressEvent::Downloading {
                downloaded_bytes: 5,
                total_bytes: Some(11),
                speed: Some(512.0),
                eta: Some(2.0),
            })
            .ok();

        tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            permit = self.gate.acquire() => {
                if let Ok(permit) = permit {
                    permit.forget();
                }
            }
        }

        Ok(FetchOutcome {
            metadata: self.metadata(&request.url),
            collection_title: None,
            artifacts: vec![StagedArtifact {
                path: staged,
                title: None,
            }],
        })
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

/// Configuration rooted in `root` with short timings
pub fn config_in(root: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = root.join("downloads");
    config.download.temp_dir = root.join("temp");
    config.download.thumbnail_dir = root.join("thumbnails");
    config.download.progress_interval = Duration::from_millis(20);
    config.download.delete_grace_period = Duration::from_millis(200);
    config.download.bulk_delete_grace_period = Duration::from_millis(500);
    config.download.shutdown_timeout = Duration::from_secs(5);
    config.persistence.tasks_path = root.join("tasks.json");
    config.health.enabled = false;
    config
}

/// Build a downloader over `engine` that persists to `config.persistence.tasks_path`
pub async fn downloader_with(config: Config, engine: Arc<GatedEngine>) -> MediaDownloader {
    let persistence = Arc::new(JsonFilePersistence::new(
        config.persistence.tasks_path.clone(),
    ));
    MediaDownloader::with_components(
        config,
        Components {
            engine,
            thumbnails: Arc::new(HttpThumbnailFetcher::new().unwrap()),
            persistence,
            probe: None,
        },
    )
    .await
    .unwrap()
}

/// Poll `stats` until `pred` holds, panicking after five seconds
pub async fn wait_for_stats(
    downloader: &MediaDownloader,
    pred: impl Fn(&QueueStats) -> bool,
) -> QueueStats {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stats = downloader.queue_stats().await;
        if pred(&stats) {
            return stats;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "queue never reached the expected state: {:?}",
            stats
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until `engine` has started `n` fetches
pub async fn wait_for_fetches(engine: &GatedEngine, n: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while engine.started() < n {
        assert!(
            tokio::time::Instant::now() < deadline,
            "only {} of {} fetches started",
            engine.started(),
            n
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
