//! Staging area for in-flight transfers
//!
//! Every artifact a worker writes lives in the temp directory under a name starting with
//! `<task-id>.`, so concurrent workers never collide and a task's partial files can be found
//! (and removed) by prefix. Finished artifacts are moved into the download directory under a
//! collision-free name.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::TaskId;
use crate::utils::{reserve_unique_dir, reserve_unique_file, sanitize_filename};

/// Per-task namespaced staging directory
#[derive(Clone, Debug)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Stage under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The staging directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name stem every artifact of `id` starts with
    pub fn stem_for(&self, id: &TaskId) -> String {
        id.to_string()
    }

    /// Every staged entry (partials, fragments, finished files) belonging to `id`
    pub async fn entries_for(&self, id: &TaskId) -> Vec<PathBuf> {
        let prefix = format!("{}.", id);
        self.matching(|name| name.starts_with(&prefix) || name == id.as_str())
            .await
    }

    /// Remove every staged entry of `id`, returning how many were removed
    ///
    /// Failures are logged and skipped.
    pub async fn cleanup(&self, id: &TaskId) -> usize {
        let entries = self.entries_for(id).await;
        let removed = remove_entries(&entries).await;
        if removed > 0 {
            tracing::debug!(task_id = %id, removed, "cleaned staged artifacts");
        }
        removed
    }

    /// Remove staged entries of every task in `ids`
    pub async fn cleanup_tasks(&self, ids: &HashSet<TaskId>) -> usize {
        let entries = self
            .matching(|name| {
                let stem = name.split('.').next().unwrap_or(name);
                ids.contains(&TaskId::new(stem))
            })
            .await;
        remove_entries(&entries).await
    }

    async fn matching(&self, pred: impl Fn(&str) -> bool) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = ?self.dir, error = %e, "failed to read staging directory");
                }
                return found;
            }
        };

        loop {
            match dir.next_entry().await {
                Ok(Some(entry)) => {
                    let name = entry.file_name();
                    if pred(&name.to_string_lossy()) {
                        found.push(entry.path());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(path = ?self.dir, error = %e, "error while listing staging directory");
                    break;
                }
            }
        }
        found
    }
}

async fn remove_entries(entries: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in entries {
        let result = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
            Ok(_) => tokio::fs::remove_file(path).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(?path, error = %e, "failed to remove staged artifact"),
        }
    }
    removed
}

/// Move one staged file into `dest_dir` as `<title>.<ext>`, de-duplicating with `_N`
///
/// The destination name is claimed before the move, so concurrent finalizations of
/// same-titled media never replace each other's files.
pub async fn finalize_file(staged: &Path, dest_dir: &Path, title: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dest_dir).await?;
    place(staged, &dest_dir.join(target_name(staged, title))).await
}

/// Move several staged files into a new de-duplicated sub-directory of `dest_dir`
///
/// Each entry is `(staged path, title)`. Returns the sub-directory.
pub async fn finalize_collection(
    files: &[(PathBuf, String)],
    dest_dir: &Path,
    collection_title: &str,
) -> Result<PathBuf> {
    if files.is_empty() {
        return Err(Error::Other("nothing to finalize".into()));
    }
    tokio::fs::create_dir_all(dest_dir).await?;
    let folder =
        reserve_unique_dir(&dest_dir.join(sanitize_filename(collection_title, "playlist"))).await?;

    for (staged, title) in files {
        place(staged, &folder.join(target_name(staged, title))).await?;
    }
    Ok(folder)
}

/// Claim a free name near `wanted` and move `staged` over the claim
async fn place(staged: &Path, wanted: &Path) -> Result<PathBuf> {
    let dest = reserve_unique_file(wanted).await?;
    if let Err(e) = move_path(staged, &dest).await {
        if let Err(cleanup) = tokio::fs::remove_file(&dest).await {
            tracing::warn!(path = ?dest, error = %cleanup, "failed to release reserved name");
        }
        return Err(e);
    }
    Ok(dest)
}

fn target_name(staged: &Path, title: &str) -> String {
    let fallback = staged
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let base = sanitize_filename(title, &fallback);
    match staged.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}.{}", base, ext),
        None => base,
    }
}

/// Rename onto a claimed name, falling back to copy-then-remove when crossing filesystems
async fn move_path(from: &Path, to: &Path) -> Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            tracing::debug!(?from, ?to, error = %rename_err, "rename failed, copying instead");
            tokio::fs::copy(from, to).await?;
            if let Err(e) = tokio::fs::remove_file(from).await {
                tracing::warn!(path = ?from, error = %e, "failed to remove staged file after copy");
            }
            Ok(())
        }
    }
}
