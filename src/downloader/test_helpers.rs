//! Shared test helpers for creating MediaDownloader instances in tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::downloader::{Components, MediaDownloader};
use crate::engine::{
    FetchEngine, FetchOutcome, FetchRequest, ProgressEvent, ProgressSender, StagedArtifact,
};
use crate::error::{Error, FetchError, Result};
use crate::health::ConnectivityProbe;
use crate::store::{MemoryPersistence, TaskStore};
use crate::thumbnail::ThumbnailFetcher;
use crate::types::{MediaMetadata, PlaylistEntry, QueueStats, Status, Task, TaskId};

/// Title every scripted fetch resolves to
pub(crate) const SCRIPTED_TITLE: &str = "Scripted Clip";

/// How a scripted fetch behaves
#[derive(Debug, Clone)]
pub(crate) enum Behavior {
    /// Stage a file and succeed immediately
    Succeed,
    /// Wait for [`ScriptedEngine::release`] (or cancellation), then succeed
    Block,
    /// Fail with the given message
    Fail(String),
    /// Report success without staging anything
    SucceedWithoutFile,
    /// Stage two entries and report them as a playlist
    Playlist,
}

/// Fetch engine fake driven by per-URL scripts
pub(crate) struct ScriptedEngine {
    default: Behavior,
    scripts: Mutex<HashMap<String, Behavior>>,
    gate: tokio::sync::Semaphore,
    started: AtomicUsize,
    cancelled: AtomicUsize,
}

impl ScriptedEngine {
    pub(crate) fn new(default: Behavior) -> Self {
        Self {
            default,
            scripts: Mutex::new(HashMap::new()),
            gate: tokio::sync::Semaphore::new(0),
            started: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        }
    }

    /// Override the behavior for one URL
    pub(crate) fn script(&self, url: &str, behavior: Behavior) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), behavior);
    }

    /// Let `n` blocked fetches complete
    pub(crate) fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Number of fetches started
    pub(crate) fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Number of fetches that observed cancellation
    pub(crate) fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn behavior_for(&self, url: &str) -> Behavior {
        self.scripts
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    fn cancel(&self) -> std::result::Result<FetchOutcome, FetchError> {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        Err(FetchError::Cancelled)
    }
}

fn stage(request: &FetchRequest, suffix: &str) -> PathBuf {
    let path = request
        .staging_dir
        .join(format!("{}.{}", request.staging_stem, suffix));
    std::fs::write(&path, b"media").unwrap();
    path
}

fn metadata() -> MediaMetadata {
    MediaMetadata {
        title: SCRIPTED_TITLE.to_string(),
        duration: Some(42.0),
        id: Some("scripted".to_string()),
        thumbnail: Some("https://img.test/scripted.jpg".to_string()),
        webpage_url: None,
    }
}

#[async_trait]
impl FetchEngine for ScriptedEngine {
    async fn resolve(&self, url: &str) -> Result<MediaMetadata> {
        if url.contains("broken") {
            return Err(Error::Fetch("unsupported URL".into()));
        }
        Ok(metadata())
    }

    async fn playlist_entries(&self, _url: &str) -> Result<Vec<PlaylistEntry>> {
        Ok((1..=2)
            .map(|i| PlaylistEntry {
                title: format!("Entry {}", i),
                duration: 10.0,
                url: format!("https://media.test/watch?v={}", i),
                thumbnail: crate::types::DEFAULT_THUMBNAIL_URL.to_string(),
                qualities: vec!["720".into()],
            })
            .collect())
    }

    async fn fetch(
        &self,
        request: FetchRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> std::result::Result<FetchOutcome, FetchError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return self.cancel();
        }

        // A partial file so cleanup has something to remove
        stage(&request, "mp4.part");
        progress
            .send(ProgressEvent::Downloading {
                downloaded_bytes: 50,
                total_bytes: Some(100),
                speed: Some(1024.0),
                eta: Some(1.0),
            })
            .ok();

        match self.behavior_for(&request.url) {
            Behavior::Block => {
                tokio::select! {
                    _ = cancel.cancelled() => return self.cancel(),
                    permit = self.gate.acquire() => {
                        if let Ok(permit) = permit {
                            permit.forget();
                        }
                    }
                }
            }
            Behavior::Fail(message) => return Err(FetchError::Failed(message)),
            Behavior::SucceedWithoutFile => {
                return Ok(FetchOutcome {
                    metadata: metadata(),
                    collection_title: None,
                    artifacts: vec![StagedArtifact {
                        path: request.staging_dir.join(format!("{}.mp4", request.staging_stem)),
                        title: None,
                    }],
                });
            }
            Behavior::Playlist => {
                let artifacts = (1..=2)
                    .map(|i| StagedArtifact {
                        path: stage(&request, &format!("{}.mp4", i)),
                        title: Some(format!("Entry {}", i)),
                    })
                    .collect();
                return Ok(FetchOutcome {
                    metadata: metadata(),
                    collection_title: Some("My Playlist".into()),
                    artifacts,
                });
            }
            Behavior::Succeed => {}
        }

        if cancel.is_cancelled() {
            return self.cancel();
        }
        let path = stage(&request, request.format.extension());
        Ok(FetchOutcome {
            metadata: metadata(),
            collection_title: None,
            artifacts: vec![StagedArtifact { path, title: None }],
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Thumbnail fetcher that writes a placeholder file
#[derive(Default)]
pub(crate) struct StubThumbnails {
    fail: bool,
    calls: AtomicUsize,
    delete_during_fetch: Mutex<Option<Arc<TaskStore>>>,
}

impl StubThumbnails {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Mark the task deleted in `store` while its thumbnail is being fetched
    ///
    /// The fetch runs after the worker's last cancellation check and before the artifacts
    /// are moved, so this lands a delete in the middle of a successful completion.
    pub(crate) fn delete_during_fetch(&self, store: Arc<TaskStore>) {
        *self.delete_during_fetch.lock().unwrap() = Some(store);
    }
}

#[async_trait]
impl ThumbnailFetcher for StubThumbnails {
    async fn fetch(&self, _source_url: &str, dir: &Path, id: &TaskId) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let store = self.delete_during_fetch.lock().unwrap().clone();
        if let Some(store) = store {
            store
                .update(id, |task| {
                    task.should_abort = true;
                    task.status = Status::Deleted;
                })
                .await?;
        }
        if self.fail {
            return Err(Error::Fetch("HTTP 404 fetching thumbnail".into()));
        }
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}.jpg", id));
        tokio::fs::write(&path, b"JPEG").await?;
        Ok(path)
    }
}

/// Connectivity probe that replays scripted results, repeating the last one
pub(crate) struct ScriptedProbe {
    results: Mutex<VecDeque<bool>>,
    last: Mutex<bool>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub(crate) fn new(results: impl IntoIterator<Item = bool>) -> Self {
        Self {
            results: Mutex::new(results.into_iter().collect()),
            last: Mutex::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectivityProbe for ScriptedProbe {
    async fn probe(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.results.lock().unwrap().pop_front();
        let reachable = match next {
            Some(result) => {
                *self.last.lock().unwrap() = result;
                result
            }
            None => *self.last.lock().unwrap(),
        };
        if reachable {
            Ok(())
        } else {
            Err(Error::Other("probe failed".into()))
        }
    }
}

/// Configuration rooted in `root` with short timings for tests
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = root.join("downloads");
    config.download.temp_dir = root.join("temp");
    config.download.thumbnail_dir = root.join("thumbnails");
    config.download.max_concurrent_downloads = 4;
    config.download.progress_interval = Duration::from_millis(20);
    config.download.delete_grace_period = Duration::from_millis(200);
    config.download.bulk_delete_grace_period = Duration::from_millis(500);
    config.download.shutdown_timeout = Duration::from_secs(5);
    config.persistence.tasks_path = root.join("tasks.json");
    config.health.enabled = false;
    config
}

/// A downloader wired to fakes, plus handles to inspect them
pub(crate) struct TestHarness {
    pub downloader: MediaDownloader,
    pub engine: Arc<ScriptedEngine>,
    pub thumbnails: Arc<StubThumbnails>,
    pub persistence: Arc<MemoryPersistence>,
    pub temp_dir: TempDir,
}

/// Build a harness with the given default engine behavior
pub(crate) async fn harness(default: Behavior) -> TestHarness {
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    harness_with(
        config,
        temp_dir,
        ScriptedEngine::new(default),
        Arc::new(StubThumbnails::default()),
        Arc::new(MemoryPersistence::new()),
        None,
    )
    .await
}

/// Build a harness from explicit parts
pub(crate) async fn harness_with(
    config: Config,
    temp_dir: TempDir,
    engine: ScriptedEngine,
    thumbnails: Arc<StubThumbnails>,
    persistence: Arc<MemoryPersistence>,
    probe: Option<Arc<dyn ConnectivityProbe>>,
) -> TestHarness {
    let engine = Arc::new(engine);
    let downloader = MediaDownloader::with_components(
        config,
        Components {
            engine: engine.clone(),
            thumbnails: thumbnails.clone(),
            persistence: persistence.clone(),
            probe,
        },
    )
    .await
    .unwrap();

    TestHarness {
        downloader,
        engine,
        thumbnails,
        persistence,
        temp_dir,
    }
}

/// Helper to create a test MediaDownloader whose fetches block until released.
/// Returns the downloader and the tempdir (which must be kept alive).
pub(crate) async fn create_test_downloader() -> (MediaDownloader, TempDir) {
    let h = harness(Behavior::Block).await;
    (h.downloader, h.temp_dir)
}

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll until the task reaches `status`
pub(crate) async fn wait_for_status(downloader: &MediaDownloader, id: &TaskId, status: Status) -> Task {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        if let Some(task) = downloader.store.get(id).await
            && task.status == status
        {
            return task;
        }
        if tokio::time::Instant::now() >= deadline {
            let current = downloader.store.get(id).await.map(|t| t.status);
            panic!("task {} never reached {:?} (now {:?})", id, status, current);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the task is gone from the store
pub(crate) async fn wait_for_removal(downloader: &MediaDownloader, id: &TaskId) {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while downloader.store.get(id).await.is_some() {
        if tokio::time::Instant::now() >= deadline {
            panic!("task {} was never removed", id);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the queue statistics satisfy `pred`
pub(crate) async fn wait_for_stats(
    downloader: &MediaDownloader,
    pred: impl Fn(&QueueStats) -> bool,
) -> QueueStats {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        let stats = downloader.queue_stats().await;
        if pred(&stats) {
            return stats;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("queue never reached expected state: {:?}", stats);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until no worker is registered
pub(crate) async fn wait_for_idle(downloader: &MediaDownloader) {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while !downloader.queue_state.active().is_empty() {
        if tokio::time::Instant::now() >= deadline {
            panic!("workers never exited");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until `engine` has started `n` fetches
pub(crate) async fn wait_for_fetches(engine: &ScriptedEngine, n: usize) {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while engine.started() < n {
        if tokio::time::Instant::now() >= deadline {
            panic!("only {} of {} fetches started", engine.started(), n);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Names of the entries in `dir`, sorted
pub(crate) fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
