//! WebSocket stream of job events.
//!
//! Each client receives every `JobEvent` as a JSON text message (tagged by
//! `type`), optionally narrowed to one job with `?job_id=`. A heartbeat keeps
//! idle connections alive.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use chrono::Utc;
use f2f_core::JobEvent;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_LAG_EVENTS, WS_MESSAGES_SENT};
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Only forward events of this job
    pub job_id: Option<String>,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.job_id))
}

/// Whether `event` should reach a client subscribed with `job_filter`.
pub fn should_forward(event: &JobEvent, job_filter: Option<&str>) -> bool {
    job_filter.map_or(true, |id| event.job_id() == id)
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, job_filter: Option<String>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before anything else so no event is missed
    let mut rx = state.orchestrator().subscribe();

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();

    info!(job_id = ?job_filter, "WebSocket client connected");

    let send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        loop {
            let text = tokio::select! {
                result = rx.recv() => match result {
                    Ok(event) => {
                        if !should_forward(&event, job_filter.as_deref()) {
                            continue;
                        }
                        WS_MESSAGES_SENT.with_label_values(&[event.kind()]).inc();
                        match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                error!("Failed to serialize JobEvent: {}", e);
                                continue;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged, skipped {} events", n);
                        WS_LAG_EVENTS.inc();
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Event channel closed");
                        break;
                    }
                },
                _ = heartbeat.tick() => {
                    WS_MESSAGES_SENT.with_label_values(&["heartbeat"]).inc();
                    json!({ "type": "heartbeat", "timestamp": Utc::now().timestamp() }).to_string()
                }
            };

            if sender.send(Message::Text(text.into())).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    // Handle incoming messages from client (ping/pong, close)
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(Message::Text(text)) => {
                debug!("Ignoring client message: {}", text);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!("WebSocket client disconnected");
}
