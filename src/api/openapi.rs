//! OpenAPI documentation and schema generation

use utoipa::OpenApi;

/// OpenAPI documentation for the media-dl REST API
///
/// Served at `/openapi.json` and, when enabled, browsable at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "media-dl REST API",
        version = "0.1.0",
        description = "REST API for submitting, controlling and monitoring media downloads",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:3452", description = "Local development server")
    ),
    paths(
        // Tasks
        crate::api::routes::list_tasks,
        crate::api::routes::get_task,
        crate::api::routes::submit_tasks,
        crate::api::routes::control_task,
        crate::api::routes::delete_task,

        // Queue-Wide Operations
        crate::api::routes::pause_queue,
        crate::api::routes::resume_queue,
        crate::api::routes::delete_queue,
        crate::api::routes::queue_stats,

        // Media
        crate::api::routes::detect,
        crate::api::routes::playlist,
        crate::api::routes::thumbnail,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
    ),
    components(schemas(
        crate::types::TaskId,
        crate::types::Task,
        crate::types::TaskView,
        crate::types::NewTask,
        crate::types::Status,
        crate::types::StreamKind,
        crate::types::TaskAction,
        crate::types::MediaMetadata,
        crate::types::PlaylistEntry,
        crate::types::Detection,
        crate::types::QueueStats,
        crate::types::Event,

        crate::api::routes::SubmitRequest,
        crate::api::routes::DetectRequest,
        crate::api::routes::QueueActionResponse,

        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "tasks", description = "Task submission and per-task control"),
        (name = "queue", description = "Queue-wide operations and statistics"),
        (name = "media", description = "URL detection, playlist listing and cached thumbnails"),
        (name = "system", description = "Health checks, OpenAPI spec, event stream"),
    )
)]
pub struct ApiDoc;
