//! Task handlers: submission, control, detection, playlists and thumbnails.

use super::{DetectRequest, PlaylistQuery, SubmitRequest};
use crate::api::AppState;
use crate::error::{ApiError, Error};
use crate::types::{Detection, Task, TaskAction, TaskId, TaskView};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{
        IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

/// GET /tasks - List all tasks
#[utoipa::path(
    get,
    path = "/tasks",
    tag = "tasks",
    responses(
        (status = 200, description = "Every task in submission order", body = Vec<TaskView>)
    )
)]
pub async fn list_tasks(State(state): State<AppState>) -> Json<Vec<TaskView>> {
    Json(state.downloader.list_tasks().await)
}

/// GET /tasks/:id - Get a single task
#[utoipa::path(
    get,
    path = "/tasks/{id}",
    tag = "tasks",
    params(
        ("id" = String, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Task information", body = TaskView),
        (status = 404, description = "Task not found", body = ApiError)
    )
)]
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskView>, Error> {
    let view = state.downloader.get_task(&TaskId::new(id)).await?;
    Ok(Json(view))
}

/// POST /tasks - Submit a batch of videos
#[utoipa::path(
    post,
    path = "/tasks",
    tag = "tasks",
    request_body = SubmitRequest,
    responses(
        (status = 201, description = "Tasks accepted", body = Vec<Task>),
        (status = 400, description = "Malformed URL, task ID or empty batch", body = ApiError),
        (status = 409, description = "Task ID already in use", body = ApiError),
        (status = 503, description = "Shutting down", body = ApiError)
    )
)]
pub async fn submit_tasks(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<Vec<Task>>), Error> {
    let tasks = state.downloader.submit_batch(request.videos).await?;
    tracing::info!(count = tasks.len(), "tasks submitted via API");
    Ok((StatusCode::CREATED, Json(tasks)))
}

/// POST /tasks/:id/:action - Pause, resume, abort or delete a task
#[utoipa::path(
    post,
    path = "/tasks/{id}/{action}",
    tag = "tasks",
    params(
        ("id" = String, Path, description = "Task ID"),
        ("action" = TaskAction, Path, description = "pause, resume, abort or delete")
    ),
    responses(
        (status = 204, description = "Action applied"),
        (status = 400, description = "Unknown action", body = ApiError),
        (status = 404, description = "Task not found", body = ApiError),
        (status = 409, description = "Action not valid in the task's current state", body = ApiError)
    )
)]
pub async fn control_task(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, String)>,
) -> Result<StatusCode, Error> {
    let action: TaskAction = action.parse()?;
    state.downloader.control(&TaskId::new(id), action).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /tasks/:id - Delete a task
#[utoipa::path(
    delete,
    path = "/tasks/{id}",
    tag = "tasks",
    params(
        ("id" = String, Path, description = "Task ID")
    ),
    responses(
        (status = 204, description = "Task deleted"),
        (status = 404, description = "Task not found", body = ApiError)
    )
)]
pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, Error> {
    state.downloader.delete(&TaskId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /detect - Classify a URL
#[utoipa::path(
    post,
    path = "/detect",
    tag = "media",
    request_body = DetectRequest,
    responses(
        (status = 200, description = "Playlist marker or single-video metadata", body = Detection),
        (status = 400, description = "Malformed URL", body = ApiError),
        (status = 502, description = "Engine could not resolve the URL", body = ApiError)
    )
)]
pub async fn detect(
    State(state): State<AppState>,
    Json(request): Json<DetectRequest>,
) -> Result<Json<Detection>, Error> {
    Ok(Json(state.downloader.detect(&request.url).await?))
}

/// GET /playlist - Stream playlist entries
///
/// Emits one `entry` event per video, an `error` event if listing fails, and a final
/// `done` event.
#[utoipa::path(
    get,
    path = "/playlist",
    tag = "media",
    params(PlaylistQuery),
    responses(
        (status = 200, description = "Server-sent events stream of playlist entries", content_type = "text/event-stream")
    )
)]
pub async fn playlist(
    State(state): State<AppState>,
    Query(query): Query<PlaylistQuery>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let (tx, rx) = tokio::sync::mpsc::channel::<SseEvent>(16);
    let downloader = state.downloader.clone();

    tokio::spawn(async move {
        match downloader.playlist_entries(&query.video_url).await {
            Ok(entries) => {
                for entry in entries {
                    match serde_json::to_string(&entry) {
                        Ok(data) => {
                            if tx.send(SseEvent::default().event("entry").data(data)).await.is_err() {
                                // Client went away
                                return;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "failed to serialize playlist entry"),
                    }
                }
            }
            Err(e) => {
                tracing::warn!(url = %query.video_url, error = %e, "failed to list playlist");
                let api_error: ApiError = e.into();
                let data = serde_json::to_string(&api_error).unwrap_or_default();
                tx.send(SseEvent::default().event("error").data(data)).await.ok();
            }
        }
        tx.send(SseEvent::default().event("done").data("{}")).await.ok();
    });

    Sse::new(ReceiverStream::new(rx).map(Ok::<_, Infallible>)).keep_alive(KeepAlive::default())
}

/// Accept only plain file names; the name is joined onto the thumbnail directory
fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

/// GET /thumbnails/:file - Serve a cached thumbnail
#[utoipa::path(
    get,
    path = "/thumbnails/{file}",
    tag = "media",
    params(
        ("file" = String, Path, description = "Thumbnail file name")
    ),
    responses(
        (status = 200, description = "Image bytes"),
        (status = 400, description = "Unsafe file name", body = ApiError),
        (status = 404, description = "No such thumbnail", body = ApiError)
    )
)]
pub async fn thumbnail(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<impl IntoResponse, Error> {
    if !is_safe_file_name(&file) {
        return Err(Error::InvalidRequest(format!("invalid thumbnail name '{}'", file)));
    }

    let path = state.config.thumbnail_dir().join(&file);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(([(header::CONTENT_TYPE, content_type_for(&file))], bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::NotFound(format!("thumbnail {}", file)))
        }
        Err(e) => Err(Error::Io(e)),
    }
}
