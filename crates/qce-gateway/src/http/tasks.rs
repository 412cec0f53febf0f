use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use qce_core::config::{DEFAULT_BATCH_SIZE, DEFAULT_RETRY_COUNT, DEFAULT_TIMEOUT_MS};
use qce_core::task::{ExportFormat, ExportTask, MessageFilter, TaskState};
use qce_core::{ChatRef, ChatType, QceError, TimeWindow};

use crate::app::AppState;
use crate::http::{not_found, ApiError, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub chat_type: ChatType,
    pub peer_uid: String,
    #[serde(default)]
    pub chat_name: Option<String>,
    pub formats: Vec<ExportFormat>,
    #[serde(default)]
    pub start_ms: i64,
    #[serde(default)]
    pub end_ms: i64,
    #[serde(default)]
    pub include_recalled: bool,
    #[serde(default)]
    pub senders: Option<Vec<String>>,
    #[serde(default)]
    pub types: Option<Vec<String>>,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub include_resource_links: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    #[serde(flatten)]
    pub task: ExportTask,
    pub state: TaskState,
}

/// POST /api/tasks — create and start an export.
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let chat = ChatRef {
        chat_type: req.chat_type,
        peer_uid: req.peer_uid,
        guild_id: None,
    };
    let window = TimeWindow::new(req.start_ms, req.end_ms)?;

    let chat_name = match req.chat_name.filter(|n| !n.is_empty()) {
        Some(name) => name,
        None => state
            .bridge
            .resolve_display_name(&chat)
            .await
            .unwrap_or_else(|_| chat.peer_uid.clone()),
    };

    let now = Utc::now();
    let task = ExportTask {
        task_id: ExportTask::generate_id(),
        chat,
        chat_name,
        formats: req.formats,
        filter: MessageFilter {
            window,
            include_recalled: req.include_recalled,
            senders: req.senders,
            types: req.types,
            keyword: req.keyword,
        },
        batch_size: req.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
        timeout_ms: req.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        retry_count: req.retry_count.unwrap_or(DEFAULT_RETRY_COUNT),
        include_resource_links: req.include_resource_links.unwrap_or(true),
        output_dir: state.config.exports_dir().display().to_string(),
        created_at: now,
        updated_at: now,
    };

    let task_id = state.engine.submit(task)?;
    Ok(Json(json!({ "taskId": task_id })))
}

/// GET /api/tasks — all tasks, newest first.
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<TaskView>>> {
    let tasks = state.store.list_tasks()?;
    Ok(Json(
        tasks
            .into_iter()
            .map(|(task, st)| TaskView { task, state: st })
            .collect(),
    ))
}

/// GET /api/tasks/{id}
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.store.get_task(&id)? {
        Some((task, st)) => Ok(Json(TaskView { task, state: st }).into_response()),
        None => Ok(not_found("task")),
    }
}

/// POST /api/tasks/{id}/cancel
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let canceled = state.engine.cancel(&id);
    if canceled {
        Json(json!({ "canceled": true })).into_response()
    } else {
        not_found("running task")
    }
}

/// DELETE /api/tasks/{id}
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.engine.delete_task(&id) {
        Ok(()) => Ok(Json(json!({ "deleted": true })).into_response()),
        Err(QceError::NotFound { .. }) => Ok(not_found("task")),
        Err(e) => Err(ApiError(e)),
    }
}

/// POST /api/maintenance/cleanup — opt-in expired-resource cleanup.
pub async fn cleanup_resources(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let days = state.config.resources.cache_cleanup_days;
    let removed = qce_resources::cleanup_cache(&state.store, days).await;
    Json(json!({ "removed": removed, "days": days }))
}
