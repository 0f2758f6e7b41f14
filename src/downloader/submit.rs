//! Task submission, URL detection and read-only queries.

use std::collections::HashSet;

use crate::engine::is_playlist_url;
use crate::error::{Error, Result, TaskError};
use crate::types::{
    Detection, NewTask, PlaylistEntry, QueueStats, STANDARD_QUALITIES, Status, Task, TaskId,
    TaskView,
};

use super::MediaDownloader;

/// Longest accepted caller-supplied task ID
const MAX_TASK_ID_LEN: usize = 64;

/// Check a caller-supplied task ID
///
/// IDs name files in the staging and thumbnail directories, so only
/// `[A-Za-z0-9_-]` is accepted.
fn validate_task_id(id: &TaskId) -> Result<()> {
    let s = id.as_str();
    let valid = !s.is_empty()
        && s.len() <= MAX_TASK_ID_LEN
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidRequest(format!(
            "task id '{}' must be 1-{} characters of [A-Za-z0-9_-]",
            s, MAX_TASK_ID_LEN
        )))
    }
}

fn validate_url(url: &str) -> Result<()> {
    let parsed = url::Url::parse(url.trim()).map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidUrl(format!(
            "unsupported scheme '{}' in {}",
            parsed.scheme(),
            url
        )));
    }
    Ok(())
}

impl MediaDownloader {
    /// Submit a single download request
    ///
    /// The task is admitted immediately when a worker slot is free, otherwise it is
    /// queued. A preview image is fetched in the background when the request names one.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] once shutdown has begun
    /// - [`Error::InvalidUrl`] / [`Error::InvalidRequest`] for malformed input
    /// - [`crate::error::TaskError::Duplicate`] when the supplied ID is taken
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use media_dl::*;
    /// # async fn example(downloader: MediaDownloader) -> Result<()> {
    /// let task = downloader
    ///     .submit(NewTask::new("https://www.youtube.com/watch?v=dQw4w9WgXcQ").quality("720"))
    ///     .await?;
    /// println!("{} is {}", task.id, task.status);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit(&self, request: NewTask) -> Result<Task> {
        if !self.queue_state.is_accepting() {
            return Err(Error::ShuttingDown);
        }
        validate_url(&request.url)?;

        let id = match &request.id {
            Some(id) => {
                validate_task_id(id)?;
                id.clone()
            }
            None => self.unused_task_id().await,
        };

        let task = Task::from_request(id, request);
        let stored = self.admit(task).await?;

        if stored.thumbnail_source.is_some() {
            let downloader = self.clone();
            let id = stored.id.clone();
            tokio::spawn(async move {
                downloader.populate_thumbnail(&id, None).await;
            });
        }

        Ok(stored)
    }

    /// Submit several requests in order
    ///
    /// Requests are validated up front. Nothing is submitted if any of them is malformed
    /// or names an ID that repeats within the batch or is already stored.
    pub async fn submit_batch(&self, requests: Vec<NewTask>) -> Result<Vec<Task>> {
        if requests.is_empty() {
            return Err(Error::InvalidRequest("no videos provided".into()));
        }
        let mut ids = HashSet::new();
        for request in &requests {
            validate_url(&request.url)?;
            if let Some(id) = &request.id {
                validate_task_id(id)?;
                if !ids.insert(id.clone()) || self.store.get(id).await.is_some() {
                    return Err(Error::Task(TaskError::Duplicate { id: id.clone() }));
                }
            }
        }

        let mut submitted = Vec::with_capacity(requests.len());
        for request in requests {
            submitted.push(self.submit(request).await?);
        }
        Ok(submitted)
    }

    /// Classify a URL and resolve its metadata when it is a single video
    pub async fn detect(&self, url: &str) -> Result<Detection> {
        validate_url(url)?;
        if is_playlist_url(url) {
            return Ok(Detection::Playlist);
        }

        let video = self.engine.resolve(url).await?;
        Ok(Detection::Video {
            video,
            qualities: STANDARD_QUALITIES.iter().map(|q| q.to_string()).collect(),
        })
    }

    /// List the entries of a playlist URL
    pub async fn playlist_entries(&self, url: &str) -> Result<Vec<PlaylistEntry>> {
        validate_url(url)?;
        self.engine.playlist_entries(url).await
    }

    /// Every task ordered by submission, with derived thumbnail URLs
    pub async fn list_tasks(&self) -> Vec<TaskView> {
        self.store.list().await
    }

    /// A single task with its derived thumbnail URL
    pub async fn get_task(&self, id: &TaskId) -> Result<TaskView> {
        self.store
            .view(id)
            .await
            .ok_or_else(|| Error::task_not_found(id))
    }

    /// Counts of tasks by status
    pub async fn queue_stats(&self) -> QueueStats {
        let max_concurrent = self.config.download.max_concurrent_downloads;
        self.store
            .transaction(|tx| {
                let mut stats = QueueStats {
                    max_concurrent,
                    ..QueueStats::default()
                };
                for task in tx.tasks() {
                    stats.total += 1;
                    match task.status {
                        Status::Queued => stats.queued += 1,
                        Status::Running => stats.running += 1,
                        Status::Processing => stats.processing += 1,
                        Status::Paused => stats.paused += 1,
                        Status::Completed => stats.completed += 1,
                        Status::Error => stats.error += 1,
                        Status::Aborted => stats.aborted += 1,
                        Status::Deleted => {}
                    }
                }
                stats
            })
            .await
    }

    /// Generate a task ID not present in the store
    async fn unused_task_id(&self) -> TaskId {
        loop {
            let id = TaskId::generate();
            if self.store.get(&id).await.is_none() {
                return id;
            }
        }
    }
}
