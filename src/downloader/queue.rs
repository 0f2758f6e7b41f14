//! Admission control and startup queue restoration.
//!
//! The pool size is `download.max_concurrent_downloads`. A task holds a slot while it is
//! `running` or `processing`. Admission decisions are made under the store lock, and the
//! worker's cancellation token is registered before the lock is released so a concurrent
//! pause always finds it.

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::store::Transaction;
use crate::types::{Event, Status, Task, TaskId};

use super::MediaDownloader;

/// A task admitted to the pool, waiting for its worker to be spawned
pub(crate) struct Admitted {
    pub(crate) id: TaskId,
    pub(crate) token: CancellationToken,
}

/// Result of placing a new task
pub(crate) enum Placement {
    Running(Admitted),
    Queued,
}

impl MediaDownloader {
    /// Insert a new task and admit it immediately when a slot is free
    ///
    /// The task is stored as `running` (and its worker spawned) or `queued`.
    pub(crate) async fn admit(&self, task: Task) -> Result<Task> {
        let accepting = self.queue_state.is_accepting();
        let max = self.config.download.max_concurrent_downloads;

        let (stored, placement) = self
            .store
            .transaction(|tx| -> Result<(Task, Placement)> {
                let id = task.id.clone();
                tx.insert(task)?;

                let placement = if accepting && tx.slot_holders() < max {
                    let admitted = self.mark_running(tx, &id);
                    admitted.map_or(Placement::Queued, Placement::Running)
                } else {
                    Placement::Queued
                };

                let stored = tx
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| crate::error::Error::task_not_found(&id))?;
                Ok((stored, placement))
            })
            .await?;

        self.emit_event(Event::Queued {
            id: stored.id.clone(),
            title: stored.title.clone(),
        });

        match placement {
            Placement::Running(admitted) => {
                tracing::info!(task_id = %stored.id, "task admitted");
                self.spawn_worker(admitted);
            }
            Placement::Queued => {
                tracing::info!(task_id = %stored.id, "all worker slots busy, task queued");
            }
        }

        Ok(stored)
    }

    /// Fill every free slot with queued tasks, oldest first
    ///
    /// Runs after every worker exit and after bulk operations. The free slot count is
    /// recomputed from the store each time. Returns the admitted task IDs.
    pub(crate) async fn run_admission_pass(&self) -> Vec<TaskId> {
        if !self.queue_state.is_accepting() {
            tracing::debug!("admission suppressed during shutdown");
            return Vec::new();
        }

        let max = self.config.download.max_concurrent_downloads;
        let admitted = self
            .store
            .transaction(|tx| {
                let free = max.saturating_sub(tx.slot_holders());
                if free == 0 {
                    return Vec::new();
                }
                tx.admissible_in_order()
                    .into_iter()
                    .take(free)
                    .filter_map(|id| self.mark_running(tx, &id))
                    .collect::<Vec<_>>()
            })
            .await;

        let ids: Vec<TaskId> = admitted.iter().map(|a| a.id.clone()).collect();
        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "admitted queued tasks");
        }
        for worker in admitted {
            self.spawn_worker(worker);
        }
        ids
    }

    /// Flip a task to `running` and register its cancellation token
    ///
    /// Must be called inside a store transaction. Returns `None` when the task already
    /// has a worker.
    fn mark_running(&self, tx: &mut Transaction<'_>, id: &TaskId) -> Option<Admitted> {
        let task = tx.get_mut(id)?;
        let token = CancellationToken::new();
        {
            let mut active = self.queue_state.active();
            if active.contains_key(id) {
                tracing::warn!(task_id = %id, "task already has a worker, not admitting");
                return None;
            }
            active.insert(id.clone(), token.clone());
        }

        task.status = Status::Running;
        task.paused = false;
        Some(Admitted {
            id: id.clone(),
            token,
        })
    }

    /// Reconcile persisted state after a restart
    ///
    /// - `deleted` tasks finish their teardown
    /// - interrupted `running`/`processing` tasks become `paused` when the pause flag is
    ///   set, `aborted` when the abort flag is set, and `queued` otherwise
    /// - `queued` tasks are re-admitted through one admission pass
    /// - staged artifacts of every known task are removed
    pub async fn restore_queue(&self) -> Vec<TaskId> {
        tracing::info!("Restoring queue from task store");

        let (doomed, known) = self
            .store
            .transaction(|tx| {
                let mut doomed = Vec::new();
                let mut known = HashSet::new();
                let mut changed = 0usize;

                for task in tx.tasks_mut() {
                    known.insert(task.id.clone());
                    match task.status {
                        Status::Deleted => doomed.push(task.clone()),
                        Status::Running | Status::Processing | Status::Queued => {
                            let next = if task.should_abort {
                                Status::Aborted
                            } else if task.paused {
                                Status::Paused
                            } else {
                                Status::Queued
                            };
                            if next != task.status {
                                tracing::info!(
                                    task_id = %task.id,
                                    from = %task.status,
                                    to = %next,
                                    "restoring interrupted task"
                                );
                                task.status = next;
                                changed += 1;
                            }
                            match next {
                                Status::Paused => task.progress = "Paused".to_string(),
                                Status::Aborted => task.progress = "Aborted".to_string(),
                                _ => {}
                            }
                            task.reset_telemetry();
                        }
                        _ => {}
                    }
                }

                for task in &doomed {
                    tx.remove(&task.id);
                }

                if changed > 0 {
                    tracing::info!(changed, "reset interrupted tasks");
                }
                (doomed, known)
            })
            .await;

        for task in doomed {
            tracing::info!(task_id = %task.id, "finishing interrupted deletion");
            self.remove_task_artifacts(&task).await;
        }

        let removed = self.staging.cleanup_tasks(&known).await;
        if removed > 0 {
            tracing::info!(removed, "removed stale staged artifacts");
        }

        let admitted = self.run_admission_pass().await;
        tracing::info!(
            restored = known.len(),
            admitted = admitted.len(),
            "Queue restoration complete"
        );
        admitted
    }
}
