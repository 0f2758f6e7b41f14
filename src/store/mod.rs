//! Task record store
//!
//! The single source of truth for task state. Every read and write goes through one
//! async mutex; compound operations run as a [`TaskStore::transaction`] closure, and a
//! transaction that changed anything is persisted once before the lock is released.
//!
//! ## Submodules
//!
//! - [`json`] - whole-document JSON file backend with atomic replace
//! - [`memory`] - in-memory backend for tests

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{Error, Result, TaskError};
use crate::types::{DEFAULT_THUMBNAIL_URL, Status, Task, TaskId, TaskMap, TaskView};

pub mod json;
pub mod memory;

pub use json::JsonFilePersistence;
pub use memory::MemoryPersistence;

/// Durable storage for the whole task map
#[async_trait]
pub trait TaskPersistence: Send + Sync {
    /// Load the persisted map. `Ok(None)` means nothing has been saved yet.
    async fn load(&self) -> Result<Option<TaskMap>>;

    /// Replace the persisted map with `tasks`
    async fn save(&self, tasks: &TaskMap) -> Result<()>;
}

struct StoreInner {
    tasks: TaskMap,
    next_seq: u64,
}

/// Mutable view of the store handed to [`TaskStore::transaction`] closures
pub struct Transaction<'a> {
    inner: &'a mut StoreInner,
    dirty: bool,
}

impl Transaction<'_> {
    /// Look up a task
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.inner.tasks.get(id)
    }

    /// Look up a task for mutation; marks the transaction dirty when found
    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        let task = self.inner.tasks.get_mut(id);
        if task.is_some() {
            self.dirty = true;
        }
        task
    }

    /// Whether a task with this ID exists
    pub fn contains(&self, id: &TaskId) -> bool {
        self.inner.tasks.contains_key(id)
    }

    /// Insert a new task, assigning its admission sequence number
    pub fn insert(&mut self, mut task: Task) -> Result<()> {
        if self.inner.tasks.contains_key(&task.id) {
            return Err(Error::Task(TaskError::Duplicate { id: task.id }));
        }
        task.seq = self.inner.next_seq;
        self.inner.next_seq += 1;
        self.inner.tasks.insert(task.id.clone(), task);
        self.dirty = true;
        Ok(())
    }

    /// Remove a task, returning it if it existed
    pub fn remove(&mut self, id: &TaskId) -> Option<Task> {
        let removed = self.inner.tasks.remove(id);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Iterate over every task (ID order)
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.inner.tasks.values()
    }

    /// Iterate mutably over every task; marks the transaction dirty
    pub fn tasks_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.dirty = true;
        self.inner.tasks.values_mut()
    }

    /// Number of tasks currently holding a worker slot
    pub fn slot_holders(&self) -> usize {
        self.inner
            .tasks
            .values()
            .filter(|t| t.status.holds_slot())
            .count()
    }

    /// Queued tasks eligible for admission, oldest first
    pub fn admissible_in_order(&self) -> Vec<TaskId> {
        let mut queued: Vec<&Task> = self
            .inner
            .tasks
            .values()
            .filter(|t| t.status == Status::Queued && !t.cancellation_requested())
            .collect();
        queued.sort_by_key(|t| t.seq);
        queued.into_iter().map(|t| t.id.clone()).collect()
    }

    /// Force a save at the end of the transaction
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

/// Task record store backed by a [`TaskPersistence`]
pub struct TaskStore {
    inner: Mutex<StoreInner>,
    persistence: Arc<dyn TaskPersistence>,
}

impl TaskStore {
    /// Load the store from its backend
    ///
    /// A missing or unreadable document yields an empty store; startup never fails here.
    pub async fn open(persistence: Arc<dyn TaskPersistence>) -> Self {
        let tasks = match persistence.load().await {
            Ok(Some(tasks)) => {
                tracing::info!(count = tasks.len(), "loaded persisted tasks");
                tasks
            }
            Ok(None) => {
                tracing::info!("no persisted tasks, starting with an empty store");
                TaskMap::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "task store unreadable, starting with an empty store");
                TaskMap::new()
            }
        };

        let (tasks, next_seq) = normalize_sequence(tasks);

        Self {
            inner: Mutex::new(StoreInner { tasks, next_seq }),
            persistence,
        }
    }

    /// Run `f` under the store lock
    ///
    /// If `f` mutated anything the whole map is saved once before the lock is released.
    /// Save failures are logged; the in-memory state stays authoritative.
    pub async fn transaction<R>(&self, f: impl FnOnce(&mut Transaction<'_>) -> R) -> R {
        let mut guard = self.inner.lock().await;
        let (result, dirty) = {
            let mut tx = Transaction {
                inner: &mut *guard,
                dirty: false,
            };
            let result = f(&mut tx);
            (result, tx.dirty)
        };

        if dirty && let Err(e) = self.persistence.save(&guard.tasks).await {
            tracing::error!(error = %e, "failed to persist task store");
        }

        result
    }

    /// Insert a new task
    pub async fn add(&self, task: Task) -> Result<Task> {
        self.transaction(|tx| {
            let id = task.id.clone();
            tx.insert(task)?;
            tx.get(&id)
                .cloned()
                .ok_or_else(|| Error::task_not_found(&id))
        })
        .await
    }

    /// Copy of a single task
    pub async fn get(&self, id: &TaskId) -> Option<Task> {
        self.inner.lock().await.tasks.get(id).cloned()
    }

    /// Mutate a single task, returning what the closure returns
    pub async fn update<R>(&self, id: &TaskId, f: impl FnOnce(&mut Task) -> R) -> Result<R> {
        self.transaction(|tx| match tx.get_mut(id) {
            Some(task) => Ok(f(task)),
            None => Err(Error::task_not_found(id)),
        })
        .await
    }

    /// Remove a task
    pub async fn remove(&self, id: &TaskId) -> Option<Task> {
        self.transaction(|tx| tx.remove(id)).await
    }

    /// Copies of every task ordered by submission, with derived thumbnail URLs
    pub async fn list(&self) -> Vec<TaskView> {
        let mut tasks: Vec<Task> = {
            let guard = self.inner.lock().await;
            guard.tasks.values().cloned().collect()
        };
        tasks.sort_by_key(|t| t.seq);

        let mut views = Vec::with_capacity(tasks.len());
        for task in tasks {
            views.push(view_of(task).await);
        }
        views
    }

    /// Copy of a single task with its derived thumbnail URL
    pub async fn view(&self, id: &TaskId) -> Option<TaskView> {
        let task = self.get(id).await?;
        Some(view_of(task).await)
    }

    /// Save the current map, surfacing any error
    pub async fn persist(&self) -> Result<()> {
        let guard = self.inner.lock().await;
        self.persistence.save(&guard.tasks).await
    }

    /// Number of stored tasks
    pub async fn len(&self) -> usize {
        self.inner.lock().await.tasks.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Derive the served thumbnail URL for a task
pub async fn view_of(task: Task) -> TaskView {
    let thumbnail_url = match thumbnail_file_name(&task).await {
        Some(name) => format!("/thumbnails/{}", name),
        None => DEFAULT_THUMBNAIL_URL.to_string(),
    };
    TaskView {
        task,
        thumbnail_url,
    }
}

async fn thumbnail_file_name(task: &Task) -> Option<String> {
    let path = task.thumbnail_path.as_deref()?;
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return None;
    }
    file_name_of(path)
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Reassign sequence numbers densely, keeping the persisted order
///
/// Documents written without sequence numbers fall back to submission time.
fn normalize_sequence(tasks: TaskMap) -> (TaskMap, u64) {
    let mut ordered: Vec<Task> = tasks.into_values().collect();
    ordered.sort_by(|a, b| {
        a.seq
            .cmp(&b.seq)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });

    let mut next_seq = 1;
    let mut normalized = TaskMap::new();
    for mut task in ordered {
        task.seq = next_seq;
        next_seq += 1;
        normalized.insert(task.id.clone(), task);
    }
    (normalized, next_seq)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
