use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use qce_bridge::Bridge;
use qce_core::config::QceConfig;
use qce_engine::ExportEngine;
use qce_store::TaskStore;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: QceConfig,
    pub bridge: Arc<dyn Bridge>,
    pub store: Arc<TaskStore>,
    pub engine: Arc<ExportEngine>,
    /// Live WS connection count, for /health.
    pub ws_clients: AtomicUsize,
}

impl AppState {
    pub fn new(
        config: QceConfig,
        bridge: Arc<dyn Bridge>,
        store: Arc<TaskStore>,
        engine: Arc<ExportEngine>,
    ) -> Self {
        Self {
            config,
            bridge,
            store,
            engine,
            ws_clients: AtomicUsize::new(0),
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/api/chats", get(crate::http::chats::list_chats))
        .route("/api/tasks", post(crate::http::tasks::create_task))
        .route("/api/tasks", get(crate::http::tasks::list_tasks))
        .route("/api/tasks/{id}", get(crate::http::tasks::get_task))
        .route("/api/tasks/{id}", delete(crate::http::tasks::delete_task))
        .route("/api/tasks/{id}/cancel", post(crate::http::tasks::cancel_task))
        .route("/api/scheduled", get(crate::http::scheduled::list_scheduled))
        .route("/api/scheduled", post(crate::http::scheduled::create_scheduled))
        .route("/api/scheduled/{id}", put(crate::http::scheduled::update_scheduled))
        .route(
            "/api/scheduled/{id}",
            delete(crate::http::scheduled::delete_scheduled),
        )
        .route(
            "/api/scheduled/{id}/history",
            get(crate::http::scheduled::list_history),
        )
        .route(
            "/api/maintenance/cleanup",
            post(crate::http::tasks::cleanup_resources),
        )
        .route("/exports/{file}", get(crate::http::exports::download_export))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
}
