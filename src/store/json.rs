//! JSON file backend

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::TaskPersistence;
use crate::error::{Result, StoreError};
use crate::types::TaskMap;

/// Persists the task map as one pretty-printed JSON object
///
/// Saves write `<path>.tmp`, fsync it, then rename over `<path>`, so a crash mid-write
/// leaves the previous document intact.
#[derive(Clone, Debug)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    /// Back the store with the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the document
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn save_failed(&self, reason: impl ToString) -> StoreError {
        StoreError::SaveFailed {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl TaskPersistence for JsonFilePersistence {
    async fn load(&self) -> Result<Option<TaskMap>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::LoadFailed {
                    path: self.path.clone(),
                    reason: e.to_string(),
                }
                .into());
            }
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        let tasks: TaskMap = serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Some(tasks))
    }

    async fn save(&self, tasks: &TaskMap) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(tasks).map_err(|e| self.save_failed(e))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.save_failed(e))?;
        }

        let tmp = self.temp_path();
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| self.save_failed(e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| self.save_failed(e))?;
        file.sync_all().await.map_err(|e| self.save_failed(e))?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.save_failed(e).into());
        }
        Ok(())
    }
}
