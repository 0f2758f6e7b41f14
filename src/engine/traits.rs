//! Traits and types for fetch engines

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::types::{MediaMetadata, PlaylistEntry, StreamKind};

/// Channel a fetch engine reports transfer progress on
pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Receiving end of a [`ProgressSender`]
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

/// Progress notification from a running fetch
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Bytes are flowing
    Downloading {
        /// Bytes transferred so far
        downloaded_bytes: u64,
        /// Expected size (exact or estimated)
        total_bytes: Option<u64>,
        /// Current rate in bytes per second
        speed: Option<f64>,
        /// Seconds remaining
        eta: Option<f64>,
    },
    /// One stream finished transferring
    Finished {
        /// File the stream was written to
        filename: Option<String>,
    },
    /// Postprocessing (merge, transcode) started
    PostProcessing {
        /// Human readable step name
        step: String,
    },
}

/// What to fetch and where to stage it
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Media page URL
    pub url: String,
    /// Resolution token or "audio"
    pub quality: String,
    /// Requested stream type
    pub format: StreamKind,
    /// Directory to write staged artifacts into
    pub staging_dir: PathBuf,
    /// Every staged file name must start with `<staging_stem>.`
    pub staging_stem: String,
}

/// A finished file waiting in the staging area
#[derive(Debug, Clone, PartialEq)]
pub struct StagedArtifact {
    /// Location in the staging directory
    pub path: PathBuf,
    /// Title of the media this file holds
    pub title: Option<String>,
}

/// Result of a successful fetch
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Resolved metadata (the playlist's for playlists)
    pub metadata: MediaMetadata,
    /// Playlist title when the request produced several files
    pub collection_title: Option<String>,
    /// Finished files, in order
    pub artifacts: Vec<StagedArtifact>,
}

/// Metadata resolution and byte transfer for media URLs
///
/// Implementations must stage every file under [`FetchRequest::staging_stem`], report
/// progress on the sender, and return [`FetchError::Cancelled`] promptly once the token
/// fires.
#[async_trait]
pub trait FetchEngine: Send + Sync {
    /// Resolve metadata for a single media URL without downloading it
    async fn resolve(&self, url: &str) -> crate::Result<MediaMetadata>;

    /// List the entries of a playlist URL
    async fn playlist_entries(&self, url: &str) -> crate::Result<Vec<PlaylistEntry>>;

    /// Transfer and postprocess the media into the staging area
    async fn fetch(
        &self,
        request: FetchRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<FetchOutcome, FetchError>;

    /// Engine name for logging
    fn name(&self) -> &'static str;
}
