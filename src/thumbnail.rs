//! Preview image caching
//!
//! Thumbnails are stored as `<thumbnail_dir>/<task-id><ext>` and served under `/thumbnails/`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::TaskId;

/// Timeout for a single thumbnail download
const THUMBNAIL_FETCH_TIMEOUT_SECS: u64 = 5;

/// Extensions kept from the source URL; anything else is stored as `.jpg`
const KNOWN_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

/// Fetches a remote preview image into the local cache
#[async_trait]
pub trait ThumbnailFetcher: Send + Sync {
    /// Download `source_url` into `dir` for task `id`, returning the written path
    async fn fetch(&self, source_url: &str, dir: &Path, id: &TaskId) -> Result<PathBuf>;
}

/// Local cache file name for a task's thumbnail
pub fn thumbnail_file_name(source_url: &str, id: &TaskId) -> String {
    let ext = url::Url::parse(source_url)
        .ok()
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
        })
        .filter(|e| KNOWN_EXTENSIONS.contains(&e.as_str()))
        .unwrap_or_else(|| "jpg".to_string());
    format!("{}.{}", id, ext)
}

/// Thumbnail fetcher over HTTP
pub struct HttpThumbnailFetcher {
    client: reqwest::Client,
}

impl HttpThumbnailFetcher {
    /// Create a fetcher with the default timeout
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(THUMBNAIL_FETCH_TIMEOUT_SECS))
    }

    /// Create a fetcher with a custom timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("media-dl")
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ThumbnailFetcher for HttpThumbnailFetcher {
    async fn fetch(&self, source_url: &str, dir: &Path, id: &TaskId) -> Result<PathBuf> {
        let parsed = url::Url::parse(source_url)
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", source_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidUrl(format!(
                "unsupported thumbnail scheme: {}",
                parsed.scheme()
            )));
        }

        let response = self.client.get(parsed).send().await?;
        if !response.status().is_success() {
            return Err(Error::Fetch(format!(
                "HTTP {} fetching thumbnail {}",
                response.status(),
                source_url
            )));
        }
        let bytes = response.bytes().await?;

        tokio::fs::create_dir_all(dir).await?;
        let name = thumbnail_file_name(source_url, id);
        let path = dir.join(&name);
        let partial = dir.join(format!(".{}.{:08x}.part", name, rand::random::<u32>()));
        tokio::fs::write(&partial, &bytes).await?;
        let linked = publish(&partial, &path).await;
        remove_thumbnail(&partial).await;
        linked?;
        Ok(path)
    }
}

/// Link a fully written file into place unless the name is already taken
///
/// The first image cached under a name is never overwritten.
async fn publish(partial: &Path, path: &Path) -> Result<()> {
    match tokio::fs::hard_link(partial, path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            tracing::debug!(?path, "thumbnail already cached, keeping the existing file");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Remove a cached thumbnail; a missing file is not an error
pub async fn remove_thumbnail(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(?path, "removed thumbnail"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(?path, error = %e, "failed to remove thumbnail"),
    }
}
