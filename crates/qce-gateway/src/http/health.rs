use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use qce_core::task::TaskStatus;

use crate::app::AppState;

/// GET /health — liveness probe with task and connection counts.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let running = state
        .store
        .tasks_by_status(TaskStatus::Running)
        .map(|t| t.len())
        .unwrap_or(0);
    let pending = state
        .store
        .tasks_by_status(TaskStatus::Pending)
        .map(|t| t.len())
        .unwrap_or(0);

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "ws_clients": state.ws_clients.load(Ordering::Relaxed),
        "tasks": { "running": running, "pending": pending },
    }))
}
