//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`tasks`] - Submission, per-task control, detection, playlists and thumbnails
//! - [`queue`] - Queue-wide operations
//! - [`system`] - Health, events, OpenAPI

use serde::{Deserialize, Serialize};

mod queue;
mod system;
mod tasks;

pub use queue::*;
pub use system::*;
pub use tasks::*;

// ============================================================================
// Query/Request Types (shared across handlers)
// ============================================================================

/// Request body for POST /tasks
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct SubmitRequest {
    /// Videos to submit, in order
    pub videos: Vec<crate::types::NewTask>,
}

/// Request body for POST /detect
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct DetectRequest {
    /// Media page URL to classify
    pub url: String,
}

/// Query parameters for GET /playlist
#[derive(Debug, Deserialize, Serialize, utoipa::IntoParams)]
pub struct PlaylistQuery {
    /// Playlist page URL
    pub video_url: String,
}

/// Response for queue-wide operations
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct QueueActionResponse {
    /// Number of tasks the operation applied to
    pub affected: usize,
}
