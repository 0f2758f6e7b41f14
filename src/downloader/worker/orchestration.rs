//! Worker orchestration: pre-start check, fetch, post-fetch re-check.

use tokio_util::sync::CancellationToken;

use crate::downloader::progress::{ProgressReporterParams, spawn_progress_reporter};
use crate::engine::FetchRequest;
use crate::error::FetchError;
use crate::types::{Event, Status, TaskId};

use super::super::MediaDownloader;
use super::WorkerOutcome;

impl MediaDownloader {
    /// Run one attempt for `id` and classify how it ended
    pub(super) async fn execute(&self, id: &TaskId, token: &CancellationToken) -> WorkerOutcome {
        let Some(task) = self.store.get(id).await else {
            tracing::info!(task_id = %id, "task vanished before start");
            return WorkerOutcome::Cancelled;
        };
        if task.cancellation_requested() || task.status == Status::Deleted || token.is_cancelled()
        {
            tracing::info!(task_id = %id, "cancelled before start");
            return WorkerOutcome::Cancelled;
        }

        self.emit_event(Event::Started { id: id.clone() });

        let request = FetchRequest {
            url: task.url.clone(),
            quality: task.quality.clone(),
            format: task.format,
            staging_dir: self.staging.dir().to_path_buf(),
            staging_stem: self.staging.stem_for(id),
        };

        let (progress_tx, progress_rx) = tokio::sync::mpsc::unbounded_channel();
        let reporter = spawn_progress_reporter(ProgressReporterParams {
            id: id.clone(),
            store: self.store.clone(),
            event_tx: self.event_tx.clone(),
            progress_rx,
            interval: self.config.download.progress_interval,
            cancel_token: token.clone(),
        });

        tracing::debug!(task_id = %id, url = %request.url, quality = %request.quality, "fetching");
        let result = self.engine.fetch(request, progress_tx, token.clone()).await;
        reporter.stop().await;

        let fetched = match result {
            Ok(fetched) => fetched,
            Err(FetchError::Cancelled) => {
                tracing::info!(task_id = %id, "fetch cancelled");
                return WorkerOutcome::Cancelled;
            }
            Err(FetchError::Failed(message)) => {
                // Killing the child on cancellation can surface as an ordinary failure
                if token.is_cancelled() {
                    tracing::info!(task_id = %id, "fetch interrupted by cancellation");
                    return WorkerOutcome::Cancelled;
                }
                tracing::warn!(task_id = %id, error = %message, "fetch failed");
                return WorkerOutcome::Failed(message);
            }
        };

        // A pause or delete may have raced the end of the transfer
        if self.cancellation_pending(id).await || token.is_cancelled() {
            tracing::info!(task_id = %id, "cancellation requested after fetch, discarding result");
            return WorkerOutcome::Cancelled;
        }

        self.populate_thumbnail(id, fetched.metadata.thumbnail.clone())
            .await;

        self.finalize(id, &task, fetched).await
    }

    /// Whether the task is gone, flagged or marked for deletion
    async fn cancellation_pending(&self, id: &TaskId) -> bool {
        self.store
            .transaction(|tx| match tx.get(id) {
                None => true,
                Some(task) => task.cancellation_requested() || task.status == Status::Deleted,
            })
            .await
    }
}
