//! Progress reporting and cooperative cancellation checkpoints.
//!
//! One reporter runs beside every worker. It drains the engine's progress channel, folds
//! the latest telemetry into the task record every `download.progress_interval`, and at
//! the same checkpoint re-reads the task's flags under the store lock. A set `paused` or
//! `should_abort` flag (or a vanished task) cancels the worker's token.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::engine::{ProgressEvent, ProgressReceiver};
use crate::store::TaskStore;
use crate::types::{Event, Status, TaskId};
use crate::utils::{format_eta, format_percent, format_speed, percent_of};

/// Parameters for spawning a progress reporter background task
pub(crate) struct ProgressReporterParams {
    /// Task ID
    pub id: TaskId,
    /// Task store
    pub store: Arc<TaskStore>,
    /// Event broadcast sender
    pub event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Engine progress channel
    pub progress_rx: ProgressReceiver,
    /// Checkpoint period
    pub interval: Duration,
    /// Worker cancellation token (cancelled when a flag is observed)
    pub cancel_token: CancellationToken,
}

/// Handle to a running reporter
pub(crate) struct ProgressReporter {
    done: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl ProgressReporter {
    /// Stop the reporter and wait for its last write to land
    pub(crate) async fn stop(self) {
        self.done.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "progress reporter task failed");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Transfer {
    downloaded_bytes: u64,
    total_bytes: Option<u64>,
    speed: Option<f64>,
    eta: Option<f64>,
}

/// What the engine reported doing most recently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Downloading,
    PostProcessing,
}

/// Telemetry received since the last checkpoint
#[derive(Debug, Default)]
struct Pending {
    transfer: Option<Transfer>,
    phase: Option<Phase>,
}

impl Pending {
    fn apply(&mut self, id: &TaskId, event: ProgressEvent) {
        match event {
            ProgressEvent::Downloading {
                downloaded_bytes,
                total_bytes,
                speed,
                eta,
            } => {
                self.transfer = Some(Transfer {
                    downloaded_bytes,
                    total_bytes,
                    speed,
                    eta,
                });
                self.phase = Some(Phase::Downloading);
            }
            ProgressEvent::Finished { filename } => {
                tracing::debug!(task_id = %id, ?filename, "stream transfer finished");
            }
            ProgressEvent::PostProcessing { step } => {
                tracing::debug!(task_id = %id, step = %step, "postprocessing step");
                self.phase = Some(Phase::PostProcessing);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.transfer.is_none() && self.phase.is_none()
    }
}

enum Checkpoint {
    /// Nothing to write
    Idle,
    /// Telemetry written
    Updated {
        transfer: Option<Transfer>,
        entered_post_processing: bool,
    },
    /// Pause/abort/delete requested, or the task is gone
    Cancel,
}

/// Spawn a background task that checkpoints progress and cancellation
pub(crate) fn spawn_progress_reporter(params: ProgressReporterParams) -> ProgressReporter {
    let ProgressReporterParams {
        id,
        store,
        event_tx,
        mut progress_rx,
        interval,
        cancel_token,
    } = params;

    let done = CancellationToken::new();
    let stop = done.clone();

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut pending = Pending::default();
        let mut channel_open = true;

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                maybe = progress_rx.recv(), if channel_open => match maybe {
                    Some(event) => pending.apply(&id, event),
                    None => channel_open = false,
                },
                _ = ticker.tick() => {
                    let batch = std::mem::take(&mut pending);
                    match checkpoint(&store, &id, batch).await {
                        Checkpoint::Idle => {}
                        Checkpoint::Updated { transfer, entered_post_processing } => {
                            if let Some(t) = transfer {
                                event_tx
                                    .send(Event::Progress {
                                        id: id.clone(),
                                        percent: percent_of(t.downloaded_bytes, t.total_bytes),
                                        downloaded_bytes: t.downloaded_bytes,
                                        speed_bps: t.speed.map(|s| s.max(0.0) as u64),
                                    })
                                    .ok();
                            }
                            if entered_post_processing {
                                tracing::info!(task_id = %id, "postprocessing started");
                                event_tx.send(Event::PostProcessing { id: id.clone() }).ok();
                            }
                        }
                        Checkpoint::Cancel => {
                            if !cancel_token.is_cancelled() {
                                tracing::debug!(task_id = %id, "cancellation requested, signalling worker");
                                cancel_token.cancel();
                            }
                        }
                    }
                }
            }
        }
    });

    ProgressReporter { done, handle }
}

async fn checkpoint(store: &TaskStore, id: &TaskId, pending: Pending) -> Checkpoint {
    store
        .transaction(|tx| {
            let cancel = match tx.get(id) {
                None => true,
                Some(task) => task.cancellation_requested() || task.status == Status::Deleted,
            };
            if cancel {
                return Checkpoint::Cancel;
            }
            if pending.is_empty() {
                return Checkpoint::Idle;
            }

            let Some(task) = tx.get_mut(id) else {
                return Checkpoint::Cancel;
            };
            if !task.status.holds_slot() {
                return Checkpoint::Idle;
            }

            // Playlists alternate between transferring and postprocessing entries
            let mut entered_post_processing = false;
            match (pending.phase, task.status) {
                (Some(Phase::PostProcessing), Status::Running) => {
                    task.status = Status::Processing;
                    task.progress = "Post-processing".to_string();
                    entered_post_processing = true;
                }
                (Some(Phase::Downloading), Status::Processing) => {
                    tracing::debug!(task_id = %id, "transfer resumed after postprocessing");
                    task.status = Status::Running;
                }
                _ => {}
            }

            if let Some(t) = pending.transfer {
                task.downloaded_bytes = Some(t.downloaded_bytes);
                task.total_bytes = t.total_bytes;
                task.speed = t.speed.map(format_speed);
                task.eta = Some(format_eta(t.eta));
                if task.status == Status::Running
                    && let Some(percent) = format_percent(t.downloaded_bytes, t.total_bytes)
                {
                    task.progress = percent;
                }
            }

            Checkpoint::Updated {
                transfer: pending.transfer,
                entered_post_processing,
            }
        })
        .await
}
