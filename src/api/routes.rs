//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use chrono::{Local, Utc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::alarm::LogAlarmSink;
use crate::config::Config;
use crate::engine::{EngineSettings, ScheduleEngine, SubmitError, WorkflowRegistry};
use crate::store::{SharedTaskStore, SqliteTaskStore, StoreError};
use crate::task::{parse_start_time, Task, TaskId, TaskStatus};
use crate::vision;

use super::types::*;

/// Photos above this size are rejected at the transport layer.
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: SharedTaskStore,
    pub registry: Arc<WorkflowRegistry>,
    /// Whether verdicts come from the real vision backend
    pub vision_backend_configured: bool,
}

/// Start the HTTP server and the schedule engine behind it.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store: SharedTaskStore = Arc::new(SqliteTaskStore::new(config.database_path.clone()).await?);

    let verifier = vision::client_from_config(&config);
    let vision_backend_configured = !verifier.is_mock();

    let engine = Arc::new(ScheduleEngine::new(
        Arc::clone(&store),
        verifier,
        Arc::new(LogAlarmSink),
        EngineSettings::from(&config),
    ));
    let registry = engine.registry();
    let engine_shutdown = engine.shutdown_token();

    // The poller runs for the lifetime of the process, independently of any
    // request/response cycle.
    {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine.run().await;
        });
    }

    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        registry,
        vision_backend_configured,
    });

    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/tasks", post(create_task))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/:id", get(get_task))
        .route("/api/tasks/:id", delete(delete_task))
        .route("/api/tasks/:id/attempts", get(list_attempts))
        .route(
            "/api/tasks/:id/verify",
            post(verify_task).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, stopping schedule engine");
            engine_shutdown.cancel();
        })
        .await?;

    Ok(())
}

/// Wait for SIGTERM/SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn store_error(e: StoreError) -> (StatusCode, String) {
    match e {
        StoreError::TaskNotFound(id) => (StatusCode::NOT_FOUND, format!("Task {} not found", id)),
        StoreError::Database(detail) => {
            tracing::error!("storage failure: {}", detail);
            (StatusCode::INTERNAL_SERVER_ERROR, "storage failure".into())
        }
    }
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: "connected".to_string(),
        vision_backend: if state.vision_backend_configured {
            "configured".to_string()
        } else {
            "mock".to_string()
        },
        timestamp: Utc::now(),
    })
}

/// Aggregate system statistics.
async fn status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, (StatusCode, String)> {
    let tasks = state.store.list_tasks().await.map_err(store_error)?;

    let count = |status: TaskStatus| tasks.iter().filter(|t| t.status() == status).count();

    Ok(Json(StatusResponse {
        current_time: Local::now().time().format("%H:%M").to_string(),
        total_tasks: tasks.len(),
        pending_tasks: count(TaskStatus::Pending),
        active_tasks: count(TaskStatus::Active),
        completed_tasks: count(TaskStatus::Completed),
        failed_tasks: count(TaskStatus::Failed),
        running_workflows: state.registry.active_count().await,
        vision_backend_configured: state.vision_backend_configured,
    }))
}

/// Schedule a new task.
async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskResponse>), (StatusCode, String)> {
    let start_time =
        parse_start_time(&req.start_time).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let task = Task::new(
        req.name,
        start_time,
        req.duration_minutes,
        req.alert_gap_minutes,
        req.verification_instructions,
    )
    .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    state.store.create_task(&task).await.map_err(store_error)?;

    tracing::info!(task_id = %task.id(), name = task.name(), "task scheduled");
    Ok((StatusCode::CREATED, Json(TaskResponse::from(&task))))
}

/// List all tasks, ordered by start time.
async fn list_tasks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TaskResponse>>, (StatusCode, String)> {
    let tasks = state.store.list_tasks().await.map_err(store_error)?;
    Ok(Json(tasks.iter().map(TaskResponse::from).collect()))
}

/// Get one task.
async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskResponse>, (StatusCode, String)> {
    let task = state
        .store
        .get_task(TaskId::from(id))
        .await
        .map_err(store_error)?
        .ok_or((StatusCode::NOT_FOUND, format!("Task {} not found", id)))?;
    Ok(Json(TaskResponse::from(&task)))
}

/// Delete a task, tearing down its workflow and alarm first.
async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let task_id = TaskId::from(id);

    // Cancel before removing the row so the workflow cannot record a
    // late attempt against a deleted task.
    if state.registry.cancel(task_id).await {
        tracing::info!(%task_id, "cancelled running workflow for deleted task");
    }

    let existed = state.store.delete_task(task_id).await.map_err(store_error)?;
    if !existed {
        return Err((StatusCode::NOT_FOUND, format!("Task {} not found", id)));
    }

    Ok(Json(serde_json::json!({
        "message": "Task deleted",
        "task_id": id,
    })))
}

/// List a task's verification attempts, oldest first.
async fn list_attempts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AttemptResponse>>, (StatusCode, String)> {
    let task_id = TaskId::from(id);
    if state
        .store
        .get_task(task_id)
        .await
        .map_err(store_error)?
        .is_none()
    {
        return Err((StatusCode::NOT_FOUND, format!("Task {} not found", id)));
    }

    let attempts = state.store.list_attempts(task_id).await.map_err(store_error)?;
    Ok(Json(attempts.iter().map(AttemptResponse::from).collect()))
}

/// Submit a photo for verification.
///
/// Multipart form with a single `image` field. The photo is queued into the
/// task's workflow; the response carries the recorded attempt and the task
/// status after branching.
async fn verify_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<VerifyResponse>, (StatusCode, String)> {
    let task_id = TaskId::from(id);

    let task = state
        .store
        .get_task(task_id)
        .await
        .map_err(store_error)?
        .ok_or((StatusCode::NOT_FOUND, format!("Task {} not found", id)))?;

    if !task.accepts_verification() {
        return Err((
            StatusCode::BAD_REQUEST,
            format!(
                "Task is not active for verification (status: {})",
                task.status()
            ),
        ));
    }

    let image = read_image_field(&mut multipart).await?;

    let outcome = state
        .registry
        .submit_photo(task_id, image)
        .await
        .map_err(|e| match e {
            SubmitError::NotRunning => (
                StatusCode::CONFLICT,
                "Task has no running verification workflow; try again shortly".to_string(),
            ),
            SubmitError::Stopped => (
                StatusCode::CONFLICT,
                "Verification workflow stopped before the photo was processed".to_string(),
            ),
        })?;

    let result = outcome
        .await
        .map_err(|_| {
            (
                StatusCode::CONFLICT,
                "Verification workflow stopped before the photo was processed".to_string(),
            )
        })?
        .map_err(store_error)?;

    Ok(Json(VerifyResponse {
        attempt: AttemptResponse::from(&result.attempt),
        task_status: result.task_status,
    }))
}

/// Pull the `image` field out of the multipart form.
async fn read_image_field(multipart: &mut Multipart) -> Result<Vec<u8>, (StatusCode, String)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid multipart body: {}", e)))?
    {
        if field.name() == Some("image") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| (StatusCode::BAD_REQUEST, format!("failed to read image: {}", e)))?;
            if bytes.is_empty() {
                return Err((StatusCode::BAD_REQUEST, "image payload is empty".into()));
            }
            return Ok(bytes.to_vec());
        }
    }
    Err((
        StatusCode::BAD_REQUEST,
        "multipart form is missing an 'image' field".into(),
    ))
}
