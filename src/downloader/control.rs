//! Task lifecycle control: pause, resume, abort, delete and their bulk variants.
//!
//! Every operation decides under the store lock and persists once. A running task keeps
//! its `running`/`processing` status until its worker observes the cancellation and writes
//! the final status, so a slot is only released when the transfer has actually stopped.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result, TaskError};
use crate::store::Transaction;
use crate::types::{Event, Status, Task, TaskAction, TaskId};

use super::MediaDownloader;

/// Poll period while waiting for cancelled workers to exit
const WORKER_EXIT_POLL: Duration = Duration::from_millis(10);

fn invalid_state(task: &Task, operation: &str) -> Error {
    Error::Task(TaskError::InvalidState {
        id: task.id.clone(),
        operation: operation.to_string(),
        current_state: task.status.to_string(),
    })
}

impl MediaDownloader {
    /// Pause a task
    ///
    /// A queued task becomes `paused` immediately. A running task has its pause flag set
    /// and its worker cancelled; the worker records `paused` once the transfer stops.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The task doesn't exist
    /// - The task is completed, failed, aborted or being deleted
    ///
    /// Pausing a paused task is a no-op that succeeds.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use media_dl::*;
    /// # async fn example(downloader: MediaDownloader, id: TaskId) -> Result<()> {
    /// downloader.pause(&id).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn pause(&self, id: &TaskId) -> Result<()> {
        let event = self
            .store
            .transaction(|tx| -> Result<Option<Event>> {
                let task = tx.get(id).ok_or_else(|| Error::task_not_found(id))?;
                match task.status {
                    Status::Paused => Ok(None),
                    Status::Completed | Status::Error | Status::Aborted | Status::Deleted => {
                        Err(invalid_state(task, "pause"))
                    }
                    Status::Queued | Status::Running | Status::Processing => {
                        Ok(self.pause_in(tx, id))
                    }
                }
            })
            .await?;

        tracing::info!(task_id = %id, "pause requested");
        if let Some(event) = event {
            self.emit_event(event);
        }
        Ok(())
    }

    /// Resume a paused task, or retry a failed one
    ///
    /// The task goes back to `queued` and an admission pass decides whether it starts
    /// right away. Resuming an active task is a no-op that succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the task doesn't exist, is completed, or was aborted.
    pub async fn resume(&self, id: &TaskId) -> Result<()> {
        let requeued = self
            .store
            .transaction(|tx| -> Result<bool> {
                let task = tx.get(id).ok_or_else(|| Error::task_not_found(id))?;
                if task.should_abort {
                    return Err(invalid_state(task, "resume"));
                }
                let pause_pending = task.paused;
                match task.status {
                    Status::Paused | Status::Error => Ok(Self::requeue_in(tx, id)),
                    Status::Queued | Status::Running | Status::Processing => {
                        // Cancel a pause the worker has not acted on yet
                        if pause_pending && let Some(task) = tx.get_mut(id) {
                            task.paused = false;
                        }
                        Ok(false)
                    }
                    Status::Completed | Status::Aborted | Status::Deleted => {
                        Err(invalid_state(task, "resume"))
                    }
                }
            })
            .await?;

        if requeued {
            tracing::info!(task_id = %id, "task resumed");
            if let Some(task) = self.store.get(id).await {
                self.emit_event(Event::Queued {
                    id: id.clone(),
                    title: task.title,
                });
            }
            self.run_admission_pass().await;
        }
        Ok(())
    }

    /// Cancel a task permanently, keeping its record
    ///
    /// Aborting an aborted task is a no-op that succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the task doesn't exist, is completed, or is being deleted.
    pub async fn abort(&self, id: &TaskId) -> Result<()> {
        let event = self
            .store
            .transaction(|tx| -> Result<Option<Event>> {
                let task = tx.get(id).ok_or_else(|| Error::task_not_found(id))?;
                match task.status {
                    Status::Aborted => Ok(None),
                    Status::Completed | Status::Deleted => Err(invalid_state(task, "abort")),
                    Status::Running | Status::Processing => {
                        if let Some(task) = tx.get_mut(id) {
                            task.should_abort = true;
                        }
                        self.cancel_worker(id);
                        Ok(None)
                    }
                    Status::Queued | Status::Paused | Status::Error => {
                        if let Some(task) = tx.get_mut(id) {
                            task.should_abort = true;
                            task.status = Status::Aborted;
                            task.progress = "Aborted".to_string();
                            task.reset_telemetry();
                        }
                        Ok(Some(Event::Aborted { id: id.clone() }))
                    }
                }
            })
            .await?;

        tracing::info!(task_id = %id, "abort requested");
        if let Some(event) = event {
            self.emit_event(event);
        }
        Ok(())
    }

    /// Delete a task and every trace of it
    ///
    /// The task is marked `deleted` and persisted, its worker (if any) is cancelled, and
    /// after waiting up to `download.delete_grace_period` for the worker to exit, the
    /// record, staged files and thumbnail are removed. The finished download in the
    /// download directory is kept.
    pub async fn delete(&self, id: &TaskId) -> Result<()> {
        let token = self
            .store
            .transaction(|tx| -> Result<Option<CancellationToken>> {
                let task = tx.get_mut(id).ok_or_else(|| Error::task_not_found(id))?;
                Self::mark_deleted(task);
                Ok(self.queue_state.active().get(id).cloned())
            })
            .await?;

        tracing::info!(task_id = %id, "delete requested");
        if let Some(token) = token {
            token.cancel();
            self.wait_for_workers(std::slice::from_ref(id), self.config.download.delete_grace_period)
                .await;
        }

        if let Some(task) = self.store.remove(id).await {
            self.remove_task_artifacts(&task).await;
            self.emit_event(Event::Removed { id: id.clone() });
        }
        Ok(())
    }

    /// Apply a [`TaskAction`] to a task
    pub async fn control(&self, id: &TaskId, action: TaskAction) -> Result<()> {
        match action {
            TaskAction::Pause => self.pause(id).await,
            TaskAction::Resume => self.resume(id).await,
            TaskAction::Abort => self.abort(id).await,
            TaskAction::Delete => self.delete(id).await,
        }
    }

    /// Pause every queued and running task
    ///
    /// Returns the number of tasks affected.
    pub async fn pause_all(&self) -> usize {
        let events = self
            .store
            .transaction(|tx| {
                let candidates: Vec<TaskId> = tx
                    .tasks()
                    .filter(|t| t.status.is_active() && !t.paused)
                    .map(|t| t.id.clone())
                    .collect();
                candidates
                    .iter()
                    .map(|id| self.pause_in(tx, id))
                    .collect::<Vec<_>>()
            })
            .await;

        let count = events.len();
        tracing::info!(count, "paused all tasks");
        for event in events.into_iter().flatten() {
            self.emit_event(event);
        }
        self.emit_event(Event::QueuePaused);
        self.run_admission_pass().await;
        count
    }

    /// Resume every paused task
    ///
    /// Tasks go back to `queued` and one admission pass fills the free slots in
    /// submission order. Returns the number of tasks resumed.
    pub async fn resume_all(&self) -> usize {
        let resumed = self
            .store
            .transaction(|tx| {
                let mut resumed = Vec::new();
                let candidates: Vec<(TaskId, Status)> = tx
                    .tasks()
                    .filter(|t| t.paused || t.status == Status::Paused)
                    .filter(|t| !t.should_abort)
                    .map(|t| (t.id.clone(), t.status))
                    .collect();
                for (id, status) in candidates {
                    if status == Status::Paused {
                        if Self::requeue_in(tx, &id) {
                            resumed.push(id);
                        }
                    } else if let Some(task) = tx.get_mut(&id) {
                        task.paused = false;
                    }
                }
                resumed
            })
            .await;

        tracing::info!(count = resumed.len(), "resumed all tasks");
        self.emit_event(Event::QueueResumed);
        self.run_admission_pass().await;
        resumed.len()
    }

    /// Delete every task
    ///
    /// Waits up to `download.bulk_delete_grace_period` for cancelled workers to exit.
    /// Workers that notice the deletion in time tear their own task down. Returns the
    /// number of tasks deleted.
    pub async fn delete_all(&self) -> usize {
        let (ids, tokens) = self
            .store
            .transaction(|tx| {
                let mut ids = Vec::new();
                for task in tx.tasks_mut() {
                    Self::mark_deleted(task);
                    ids.push(task.id.clone());
                }
                let active = self.queue_state.active();
                let tokens: Vec<CancellationToken> =
                    ids.iter().filter_map(|id| active.get(id).cloned()).collect();
                (ids, tokens)
            })
            .await;

        tracing::info!(count = ids.len(), "delete all requested");
        if !tokens.is_empty() {
            for token in &tokens {
                token.cancel();
            }
            self.wait_for_workers(&ids, self.config.download.bulk_delete_grace_period)
                .await;
        }

        let removed = self
            .store
            .transaction(|tx| ids.iter().filter_map(|id| tx.remove(id)).collect::<Vec<_>>())
            .await;

        for task in &removed {
            self.remove_task_artifacts(task).await;
            self.emit_event(Event::Removed {
                id: task.id.clone(),
            });
        }
        ids.len()
    }

    /// Pause one active task inside a transaction
    ///
    /// Queued tasks switch to `paused` at once (returning the event to emit); running
    /// tasks are flagged and their worker cancelled.
    fn pause_in(&self, tx: &mut Transaction<'_>, id: &TaskId) -> Option<Event> {
        let task = tx.get_mut(id)?;
        task.paused = true;
        if task.status == Status::Queued {
            task.status = Status::Paused;
            task.progress = "Paused".to_string();
            return Some(Event::Paused { id: id.clone() });
        }
        self.cancel_worker(id);
        None
    }

    /// Move a paused or failed task back to `queued` inside a transaction
    fn requeue_in(tx: &mut Transaction<'_>, id: &TaskId) -> bool {
        let Some(task) = tx.get_mut(id) else {
            return false;
        };
        task.paused = false;
        task.status = Status::Queued;
        task.progress = "0%".to_string();
        task.reset_telemetry();
        true
    }

    fn mark_deleted(task: &mut Task) {
        task.should_abort = true;
        task.status = Status::Deleted;
    }

    /// Cancel the worker of `id`, if it has one
    ///
    /// Safe to call under the store lock.
    pub(crate) fn cancel_worker(&self, id: &TaskId) -> bool {
        match self.queue_state.active().get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait until none of `ids` has a registered worker, or `grace` elapses
    ///
    /// Returns `true` when every worker exited in time.
    pub(crate) async fn wait_for_workers(&self, ids: &[TaskId], grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let remaining = {
                let active = self.queue_state.active();
                ids.iter().filter(|id| active.contains_key(*id)).count()
            };
            if remaining == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::debug!(remaining, "grace period elapsed with workers still running");
                return false;
            }
            tokio::time::sleep(WORKER_EXIT_POLL).await;
        }
    }
}
