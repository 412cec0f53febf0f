use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Local, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use qce_core::schedule::{ScheduleType, ScheduledExport, TimeRangeType};
use qce_core::task::ExportFormat;
use qce_core::{ChatRef, ChatType};

use crate::app::AppState;
use crate::http::{not_found, ApiError, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub name: String,
    pub chat_type: ChatType,
    pub peer_uid: String,
    pub schedule_type: ScheduleType,
    #[serde(default = "default_execute_time")]
    pub execute_time: String,
    #[serde(default)]
    pub cron_expression: Option<String>,
    pub time_range_type: TimeRangeType,
    #[serde(default)]
    pub range_offset_start: Option<i64>,
    #[serde(default)]
    pub range_offset_end: Option<i64>,
    pub format: ExportFormat,
    #[serde(default)]
    pub options: Option<Value>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_execute_time() -> String {
    "00:00".to_string()
}

fn default_enabled() -> bool {
    true
}

fn build_schedule(id: String, req: ScheduleRequest, created_at: chrono::DateTime<Utc>) -> ScheduledExport {
    let now = Utc::now();
    ScheduledExport {
        id,
        name: req.name,
        chat: ChatRef {
            chat_type: req.chat_type,
            peer_uid: req.peer_uid,
            guild_id: None,
        },
        schedule_type: req.schedule_type,
        execute_time: req.execute_time,
        cron_expression: req.cron_expression,
        time_range_type: req.time_range_type,
        range_offset_start: req.range_offset_start,
        range_offset_end: req.range_offset_end,
        format: req.format,
        options: req.options.unwrap_or_else(|| json!({})),
        enabled: req.enabled,
        last_run: None,
        next_run: None,
        created_at,
        updated_at: now,
    }
}

/// GET /api/scheduled
pub async fn list_scheduled(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<ScheduledExport>>> {
    Ok(Json(state.store.list_scheduled(false)?))
}

/// POST /api/scheduled — create; `next_run` is computed up front so the
/// scheduler can fire it without waiting for a restart.
pub async fn create_scheduled(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScheduleRequest>,
) -> ApiResult<Json<ScheduledExport>> {
    let mut sched = build_schedule(Uuid::now_v7().to_string(), req, Utc::now());
    if sched.enabled {
        sched.next_run = qce_scheduler::compute_next_run(&sched, Local::now())
            .map_err(qce_core::QceError::from)?;
    }
    state.store.create_scheduled(&sched)?;
    Ok(Json(sched))
}

/// PUT /api/scheduled/{id}
pub async fn update_scheduled(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ScheduleRequest>,
) -> Result<Response, ApiError> {
    let Some(existing) = state.store.get_scheduled(&id)? else {
        return Ok(not_found("scheduled export"));
    };
    let mut sched = build_schedule(id, req, existing.created_at);
    sched.last_run = existing.last_run;
    if sched.enabled {
        sched.next_run = qce_scheduler::compute_next_run(&sched, Local::now())
            .map_err(qce_core::QceError::from)?;
    }
    state.store.update_scheduled(&sched)?;
    Ok(Json(sched).into_response())
}

/// DELETE /api/scheduled/{id}
pub async fn delete_scheduled(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.store.delete_scheduled(&id) {
        Ok(()) => Ok(Json(json!({ "deleted": true })).into_response()),
        Err(qce_store::StoreError::NotFound { .. }) => Ok(not_found("scheduled export")),
        Err(e) => Err(ApiError(e.into())),
    }
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    20
}

/// GET /api/scheduled/{id}/history
pub async fn list_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<qce_core::schedule::ExecutionHistory>>> {
    Ok(Json(state.store.list_history(&id, query.limit.min(100))?))
}
