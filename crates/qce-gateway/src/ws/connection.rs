use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info};

use crate::app::AppState;

const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Axum handler — upgrades HTTP to WebSocket at GET /ws.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_connection(socket, state))
}

/// Per-connection task.
///
/// The stream is broadcast-only: every export event goes to every client, in
/// emission order. Inbound frames are ignored except ping/close — task
/// control lives on the HTTP API.
async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    state.ws_clients.fetch_add(1, Ordering::Relaxed);
    info!(conn_id = %conn_id, "new WS connection");

    let (mut tx, mut rx) = socket.split();
    let mut events = state.engine.subscribe();

    let mut heartbeat =
        tokio::time::interval(std::time::Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            // export event → forward to this client
            event = events.recv() => {
                match event {
                    Ok(payload) => {
                        if tx.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    // Slow consumer fell behind the ring buffer — resume
                    // from the current position rather than dropping them.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!(conn_id, skipped = n, "WS client lagged behind event stream");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }

            // client sent us something
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // broadcast-only surface
                    Some(Err(_)) => break,
                }
            }

            _ = heartbeat.tick() => {
                if tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.ws_clients.fetch_sub(1, Ordering::Relaxed);
    info!(conn_id, "WS connection closed");
}
