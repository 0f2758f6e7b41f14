//! Queue-wide operation handlers.

use super::QueueActionResponse;
use crate::api::AppState;
use crate::types::QueueStats;
use axum::{Json, extract::State};

/// POST /queue/pause - Pause every active task
#[utoipa::path(
    post,
    path = "/queue/pause",
    tag = "queue",
    responses(
        (status = 200, description = "Queue paused", body = QueueActionResponse)
    )
)]
pub async fn pause_queue(State(state): State<AppState>) -> Json<QueueActionResponse> {
    let affected = state.downloader.pause_all().await;
    Json(QueueActionResponse { affected })
}

/// POST /queue/resume - Resume every paused task
#[utoipa::path(
    post,
    path = "/queue/resume",
    tag = "queue",
    responses(
        (status = 200, description = "Queue resumed", body = QueueActionResponse)
    )
)]
pub async fn resume_queue(State(state): State<AppState>) -> Json<QueueActionResponse> {
    let affected = state.downloader.resume_all().await;
    Json(QueueActionResponse { affected })
}

/// POST /queue/delete - Delete every task
#[utoipa::path(
    post,
    path = "/queue/delete",
    tag = "queue",
    responses(
        (status = 200, description = "All tasks deleted", body = QueueActionResponse)
    )
)]
pub async fn delete_queue(State(state): State<AppState>) -> Json<QueueActionResponse> {
    let affected = state.downloader.delete_all().await;
    Json(QueueActionResponse { affected })
}

/// GET /queue/stats - Task counts by status
#[utoipa::path(
    get,
    path = "/queue/stats",
    tag = "queue",
    responses(
        (status = 200, description = "Queue statistics", body = QueueStats)
    )
)]
pub async fn queue_stats(State(state): State<AppState>) -> Json<QueueStats> {
    Json(state.downloader.queue_stats().await)
}
