//! Core types for media-dl

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use utoipa::ToSchema;

/// Placeholder served for tasks without a cached thumbnail
pub const DEFAULT_THUMBNAIL_URL: &str = "/static/images/default-thumbnail.png";

/// Resolutions offered for single videos by [`crate::MediaDownloader::detect`]
pub const STANDARD_QUALITIES: [&str; 6] = ["144", "240", "360", "480", "720", "1080"];

/// Unique identifier for a task
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a TaskId from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random 8-character hex identifier
    pub fn generate() -> Self {
        let value: u32 = rand::thread_rng().r#gen();
        Self(format!("{:08x}", value))
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task status
///
/// `Deleted` is a transient marker written just before a task is removed from the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Waiting for a free worker slot
    Queued,
    /// A worker is transferring the media
    Running,
    /// Suspended by the user
    Paused,
    /// A worker is running postprocessing (merge, transcode)
    Processing,
    /// Finished; the artifact is in the download directory
    Completed,
    /// The fetch engine failed; kept for inspection or retry
    Error,
    /// Cancelled permanently
    Aborted,
    /// About to be removed
    Deleted,
}

impl Status {
    /// Whether a task in this status holds a worker slot
    pub fn holds_slot(&self) -> bool {
        matches!(self, Status::Running | Status::Processing)
    }

    /// Whether the task still has work ahead of it
    pub fn is_active(&self) -> bool {
        matches!(self, Status::Queued | Status::Running | Status::Processing)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Queued => "queued",
            Status::Running => "running",
            Status::Paused => "paused",
            Status::Processing => "processing",
            Status::Completed => "completed",
            Status::Error => "error",
            Status::Aborted => "aborted",
            Status::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Logical stream type requested for a task
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Audio only (mp3)
    Audio,
    /// Single video (mp4)
    #[default]
    Video,
    /// Every entry of a playlist (mp4)
    Playlist,
}

impl StreamKind {
    /// Extension of the finished artifact
    pub fn extension(&self) -> &'static str {
        match self {
            StreamKind::Audio => "mp3",
            StreamKind::Video | StreamKind::Playlist => "mp4",
        }
    }
}

/// Task record, the unit of work and its persisted lifecycle state
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Task {
    /// Task ID
    pub id: TaskId,
    /// Media page URL
    pub url: String,
    /// Resolution token (e.g. "720") or "audio"
    pub quality: String,
    /// Requested stream type
    pub format: StreamKind,
    /// Display title
    pub title: String,
    /// Current status
    pub status: Status,
    /// User asked to suspend the task
    #[serde(default)]
    pub paused: bool,
    /// User asked to cancel the task permanently
    #[serde(default)]
    pub should_abort: bool,
    /// Percentage, status token or error message
    #[serde(default)]
    pub progress: String,
    /// Bytes transferred so far
    #[serde(default)]
    pub downloaded_bytes: Option<u64>,
    /// Expected size in bytes
    #[serde(default)]
    pub total_bytes: Option<u64>,
    /// Human readable transfer speed
    #[serde(default)]
    pub speed: Option<String>,
    /// Human readable time remaining
    #[serde(default)]
    pub eta: Option<String>,
    /// File name of the finished artifact
    #[serde(default)]
    pub filename: Option<String>,
    /// Absolute location of the finished artifact
    #[serde(default)]
    pub final_path: Option<PathBuf>,
    /// Local cached preview image
    #[serde(default)]
    pub thumbnail_path: Option<PathBuf>,
    /// Remote preview image supplied at submission
    #[serde(default)]
    pub thumbnail_source: Option<String>,
    /// When the task was submitted
    pub created_at: DateTime<Utc>,
    /// Insertion sequence assigned by the store; admission order among queued tasks
    #[serde(default)]
    pub seq: u64,
}

impl Task {
    /// Build a fresh queued task from a submission request
    pub fn from_request(id: TaskId, request: NewTask) -> Self {
        let title = request
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| request.url.clone());
        Self {
            id,
            url: request.url,
            quality: request.quality,
            format: request.format,
            title,
            status: Status::Queued,
            paused: false,
            should_abort: false,
            progress: "0%".to_string(),
            downloaded_bytes: None,
            total_bytes: None,
            speed: None,
            eta: None,
            filename: None,
            final_path: None,
            thumbnail_path: None,
            thumbnail_source: request.thumbnail,
            created_at: Utc::now(),
            seq: 0,
        }
    }

    /// Whether a pause or abort has been requested
    pub fn cancellation_requested(&self) -> bool {
        self.paused || self.should_abort
    }

    /// Clear transfer telemetry (used when a task is re-queued)
    pub(crate) fn reset_telemetry(&mut self) {
        self.downloaded_bytes = None;
        self.total_bytes = None;
        self.speed = None;
        self.eta = None;
    }
}

/// Persisted task map, keyed by task ID
pub type TaskMap = BTreeMap<TaskId, Task>;

/// Defensive copy of a task with its derived thumbnail URL
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskView {
    /// The task record
    #[serde(flatten)]
    pub task: Task,
    /// URL the UI should load the preview from (never persisted)
    pub thumbnail_url: String,
}

/// Submission request for a new task
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct NewTask {
    /// Media page URL
    pub url: String,
    /// Resolution token (e.g. "720") or "audio"
    #[serde(default = "default_quality")]
    pub quality: String,
    /// Requested stream type
    #[serde(default)]
    pub format: StreamKind,
    /// Display title (defaults to the URL)
    #[serde(default)]
    pub title: Option<String>,
    /// Remote preview image URL
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Caller-chosen task ID (generated when absent)
    #[serde(default)]
    pub id: Option<TaskId>,
}

fn default_quality() -> String {
    "best".to_string()
}

impl NewTask {
    /// Create a request for the given URL with default quality and stream type
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            quality: default_quality(),
            ..Default::default()
        }
    }

    /// Set the quality token
    pub fn quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    /// Set the stream type
    pub fn format(mut self, format: StreamKind) -> Self {
        self.format = format;
        self
    }

    /// Set the display title
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the task ID
    pub fn id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// User-issued control action for a single task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskAction {
    /// Suspend the task
    Pause,
    /// Continue a paused task or retry a failed one
    Resume,
    /// Cancel the task permanently but keep its record
    Abort,
    /// Cancel the task and remove every trace of it
    Delete,
}

impl std::str::FromStr for TaskAction {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(TaskAction::Pause),
            "resume" => Ok(TaskAction::Resume),
            "abort" => Ok(TaskAction::Abort),
            "delete" => Ok(TaskAction::Delete),
            other => Err(crate::error::Error::InvalidRequest(format!(
                "unknown task action '{}', expected pause, resume, abort or delete",
                other
            ))),
        }
    }
}

/// Metadata resolved by the fetch engine
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MediaMetadata {
    /// Media title
    pub title: String,
    /// Duration in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Site-specific media ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Remote thumbnail URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Canonical page URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webpage_url: Option<String>,
}

/// One entry of a playlist listing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PlaylistEntry {
    /// Entry title
    pub title: String,
    /// Duration in seconds (0 when unknown)
    pub duration: f64,
    /// Entry page URL
    pub url: String,
    /// Preview image URL
    pub thumbnail: String,
    /// Resolutions offered for this entry
    pub qualities: Vec<String>,
}

/// Result of probing a URL before submission
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Detection {
    /// The URL is a playlist; entries are listed separately
    Playlist,
    /// The URL is a single video
    Video {
        /// Resolved metadata
        video: MediaMetadata,
        /// Resolutions offered
        qualities: Vec<String>,
    },
}

/// Counts of tasks by status
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QueueStats {
    /// Total tasks in the store
    pub total: usize,
    /// Tasks queued for a slot
    pub queued: usize,
    /// Tasks transferring
    pub running: usize,
    /// Tasks postprocessing
    pub processing: usize,
    /// Paused tasks
    pub paused: usize,
    /// Completed tasks
    pub completed: usize,
    /// Failed tasks
    pub error: usize,
    /// Aborted tasks
    pub aborted: usize,
    /// Configured worker pool size
    pub max_concurrent: usize,
}

/// Event emitted during the task lifecycle
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task waiting for a slot
    Queued {
        /// Task ID
        id: TaskId,
        /// Task title
        title: String,
    },

    /// Worker started for a task
    Started {
        /// Task ID
        id: TaskId,
    },

    /// Transfer progress update
    Progress {
        /// Task ID
        id: TaskId,
        /// Progress percentage (0.0 to 100.0), when the total is known
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<f32>,
        /// Bytes transferred so far
        downloaded_bytes: u64,
        /// Speed in bytes per second
        #[serde(skip_serializing_if = "Option::is_none")]
        speed_bps: Option<u64>,
    },

    /// Postprocessing started
    PostProcessing {
        /// Task ID
        id: TaskId,
    },

    /// Task completed
    Completed {
        /// Task ID
        id: TaskId,
        /// Final artifact location
        path: PathBuf,
    },

    /// Task failed
    Failed {
        /// Task ID
        id: TaskId,
        /// Error message
        error: String,
    },

    /// Task paused
    Paused {
        /// Task ID
        id: TaskId,
    },

    /// Task aborted
    Aborted {
        /// Task ID
        id: TaskId,
    },

    /// Task removed from the store
    Removed {
        /// Task ID
        id: TaskId,
    },

    /// All active tasks paused
    QueuePaused,

    /// All paused tasks resumed
    QueueResumed,

    /// Connectivity probe failed repeatedly; active work was paused
    ConnectivityLost {
        /// Consecutive failed probes
        consecutive_failures: u32,
    },

    /// Downloader shutting down
    Shutdown,
}

impl Event {
    /// Machine-readable event name (used as the SSE event type)
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Queued { .. } => "queued",
            Event::Started { .. } => "started",
            Event::Progress { .. } => "progress",
            Event::PostProcessing { .. } => "post_processing",
            Event::Completed { .. } => "completed",
            Event::Failed { .. } => "failed",
            Event::Paused { .. } => "paused",
            Event::Aborted { .. } => "aborted",
            Event::Removed { .. } => "removed",
            Event::QueuePaused => "queue_paused",
            Event::QueueResumed => "queue_resumed",
            Event::ConnectivityLost { .. } => "connectivity_lost",
            Event::Shutdown => "shutdown",
        }
    }
}
