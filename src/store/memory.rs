//! In-memory backend

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::TaskPersistence;
use crate::error::{Result, StoreError};
use crate::types::TaskMap;

/// Keeps the last saved map in memory
///
/// Counts saves and can be told to fail them, for exercising the store's error paths.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    saved: Mutex<Option<TaskMap>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryPersistence {
    /// Empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that loads `tasks` on open
    pub fn with_tasks(tasks: TaskMap) -> Self {
        Self {
            saved: Mutex::new(Some(tasks)),
            ..Self::default()
        }
    }

    /// Last saved map
    pub fn snapshot(&self) -> Option<TaskMap> {
        self.saved.lock().ok().and_then(|saved| saved.clone())
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make subsequent saves fail (or succeed again)
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskPersistence for MemoryPersistence {
    async fn load(&self) -> Result<Option<TaskMap>> {
        Ok(self.snapshot())
    }

    async fn save(&self, tasks: &TaskMap) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected save failure".into()).into());
        }
        {
            let mut saved = self
                .saved
                .lock()
                .map_err(|_| StoreError::Unavailable("memory backend poisoned".into()))?;
            *saved = Some(tasks.clone());
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
