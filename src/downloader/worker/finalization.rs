//! Artifact finalization and outcome reconciliation.

use std::path::PathBuf;

use crate::engine::FetchOutcome;
use crate::staging::{finalize_collection, finalize_file};
use crate::thumbnail::remove_thumbnail;
use crate::types::{Event, Status, StreamKind, Task, TaskId};

use super::super::MediaDownloader;
use super::WorkerOutcome;

/// What the terminal store write decided
enum Settled {
    /// Status written; emit this event
    Updated(Event),
    /// The task was marked for deletion; the worker finishes teardown
    Teardown(Box<Task>),
    /// The task no longer exists
    Gone,
}

impl MediaDownloader {
    /// Move the staged artifacts into the download directory
    pub(super) async fn finalize(
        &self,
        id: &TaskId,
        task: &Task,
        fetched: FetchOutcome,
    ) -> WorkerOutcome {
        let FetchOutcome {
            metadata,
            collection_title,
            artifacts,
        } = fetched;

        if artifacts.is_empty() {
            return WorkerOutcome::Failed("engine reported success but produced no file".into());
        }
        for artifact in &artifacts {
            if !tokio::fs::try_exists(&artifact.path).await.unwrap_or(false) {
                tracing::warn!(task_id = %id, path = ?artifact.path, "staged artifact missing");
                return WorkerOutcome::Failed(format!(
                    "staged artifact missing: {}",
                    artifact.path.display()
                ));
            }
        }

        let resolved_title = Some(metadata.title.clone()).filter(|t| !t.trim().is_empty());
        let fallback_title = resolved_title.clone().unwrap_or_else(|| task.title.clone());
        let dest_dir = self.config.download_dir();

        let is_collection = task.format == StreamKind::Playlist
            && (collection_title.is_some() || artifacts.len() > 1);

        let finalized = if is_collection {
            let files: Vec<(PathBuf, String)> = artifacts
                .iter()
                .map(|a| {
                    let title = a.title.clone().unwrap_or_else(|| fallback_title.clone());
                    (a.path.clone(), title)
                })
                .collect();
            let folder_title = collection_title.unwrap_or_else(|| fallback_title.clone());
            finalize_collection(&files, dest_dir, &folder_title).await
        } else {
            let artifact = &artifacts[0];
            if artifacts.len() > 1 {
                tracing::warn!(
                    task_id = %id,
                    count = artifacts.len(),
                    "engine staged several files for a single item, keeping the first"
                );
            }
            let title = artifact.title.clone().unwrap_or_else(|| fallback_title.clone());
            finalize_file(&artifact.path, dest_dir, &title).await
        };

        match finalized {
            Ok(final_path) => {
                let filename = final_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| fallback_title.clone());
                tracing::info!(task_id = %id, path = ?final_path, "artifact finalized");
                WorkerOutcome::Completed {
                    final_path,
                    filename,
                    resolved_title,
                }
            }
            Err(e) => {
                tracing::error!(task_id = %id, error = %e, "failed to finalize artifact");
                WorkerOutcome::Failed(format!("failed to move download into place: {}", e))
            }
        }
    }

    /// Write the terminal status for this attempt, reconciling it with the task's flags
    pub(super) async fn settle(&self, id: &TaskId, outcome: WorkerOutcome) {
        let settled = self
            .store
            .transaction(|tx| {
                let Some(task) = tx.get_mut(id) else {
                    return Settled::Gone;
                };
                if task.status == Status::Deleted {
                    return match tx.remove(id) {
                        Some(task) => Settled::Teardown(Box::new(task)),
                        None => Settled::Gone,
                    };
                }

                let event = match outcome {
                    WorkerOutcome::Completed {
                        final_path,
                        filename,
                        resolved_title,
                    } => {
                        task.status = Status::Completed;
                        task.paused = false;
                        task.progress = "100%".to_string();
                        task.speed = None;
                        task.eta = None;
                        task.filename = Some(filename);
                        task.final_path = Some(final_path.clone());
                        if let Some(title) = resolved_title
                            && task.title == task.url
                        {
                            task.title = title;
                        }
                        Event::Completed {
                            id: id.clone(),
                            path: final_path,
                        }
                    }
                    WorkerOutcome::Failed(_) | WorkerOutcome::Cancelled
                        if task.should_abort =>
                    {
                        task.status = Status::Aborted;
                        task.progress = "Aborted".to_string();
                        task.reset_telemetry();
                        Event::Aborted { id: id.clone() }
                    }
                    WorkerOutcome::Failed(_) | WorkerOutcome::Cancelled if task.paused => {
                        task.status = Status::Paused;
                        task.progress = "Paused".to_string();
                        task.reset_telemetry();
                        Event::Paused { id: id.clone() }
                    }
                    WorkerOutcome::Cancelled => {
                        // A resume cleared the flag before the worker noticed the pause
                        task.status = Status::Queued;
                        task.progress = "0%".to_string();
                        task.reset_telemetry();
                        Event::Queued {
                            id: id.clone(),
                            title: task.title.clone(),
                        }
                    }
                    WorkerOutcome::Failed(message) => {
                        task.status = Status::Error;
                        task.progress = format!("Error: {}", message);
                        task.speed = None;
                        task.eta = None;
                        Event::Failed {
                            id: id.clone(),
                            error: message,
                        }
                    }
                };
                Settled::Updated(event)
            })
            .await;

        match settled {
            Settled::Updated(event) => {
                tracing::info!(task_id = %id, outcome = event.kind(), "worker finished");
                self.emit_event(event);
            }
            Settled::Teardown(task) => {
                tracing::info!(task_id = %id, "task deleted while running, tearing down");
                self.remove_task_artifacts(&task).await;
                self.emit_event(Event::Removed { id: id.clone() });
            }
            Settled::Gone => {
                tracing::debug!(task_id = %id, "task removed while running");
            }
        }
    }

    /// Best-effort download of the task's preview image
    ///
    /// Prefers `source` (usually the engine's metadata) over the submitted thumbnail URL.
    /// An existing thumbnail file is never replaced. Failures are logged and swallowed.
    pub(crate) async fn populate_thumbnail(&self, id: &TaskId, source: Option<String>) {
        let Some(task) = self.store.get(id).await else {
            return;
        };
        let observed = task.thumbnail_path.clone();
        if let Some(path) = &observed
            && tokio::fs::try_exists(path).await.unwrap_or(false)
        {
            return;
        }
        let Some(source) = source
            .filter(|s| !s.trim().is_empty())
            .or(task.thumbnail_source)
        else {
            return;
        };

        let written = match self
            .thumbnails
            .fetch(&source, self.config.thumbnail_dir(), id)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(task_id = %id, source = %source, error = %e, "failed to fetch thumbnail");
                return;
            }
        };

        let recorded = self
            .store
            .transaction(|tx| {
                let (live, vacant, same_file) = match tx.get(id) {
                    Some(task) => (
                        task.status != Status::Deleted,
                        task.thumbnail_path.is_none() || task.thumbnail_path == observed,
                        task.thumbnail_path.as_ref() == Some(&written),
                    ),
                    None => (false, false, false),
                };
                if !live {
                    return false;
                }
                if vacant && let Some(task) = tx.get_mut(id) {
                    task.thumbnail_path = Some(written.clone());
                    return true;
                }
                // Another fetch won; only keep our file if it is the same one
                same_file
            })
            .await;

        if recorded {
            tracing::debug!(task_id = %id, path = ?written, "thumbnail cached");
        } else {
            remove_thumbnail(&written).await;
        }
    }

    /// Remove the staged files and cached thumbnail of a task that left the store
    pub(crate) async fn remove_task_artifacts(&self, task: &Task) {
        self.staging.cleanup(&task.id).await;
        if let Some(path) = &task.thumbnail_path {
            remove_thumbnail(path).await;
        }
    }
}
