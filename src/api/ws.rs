//! WebSocket push feed
//!
//! Clients connect to `/ws` and receive the full dashboard snapshot
//! (tiles, discovery view, recent actions/anomalies, engine status) once
//! per second. Inbound frames are only serviced for Ping/Close; the feed
//! is one-way.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use super::handlers::ApiContext;

/// Axum handler for the WebSocket upgrade request.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiContext>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Push snapshots at 1 Hz until the peer goes away.
async fn handle_ws_connection(socket: WebSocket, state: ApiContext) {
    info!("WebSocket client connected");
    let (mut sender, mut receiver) = socket.split();
    let mut push_interval = interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = push_interval.tick() => {
                let snapshot = build_snapshot(&state).await;
                let frame = match serde_json::to_string(&snapshot) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "Snapshot serialization failed");
                        continue;
                    }
                };
                if let Err(e) = sender.send(Message::Text(frame)).await {
                    debug!(error = %e, "WebSocket send failed — disconnecting");
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Ok(_)) => {
                        // Inbound text/binary is ignored; the feed is one-way.
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}

async fn build_snapshot(state: &ApiContext) -> serde_json::Value {
    let mut engine = state.engine.write().await;
    let discover = engine.list_discoveries();
    json!({
        "tiles": engine.tiles(),
        "discover": discover,
        "actions": engine.recent_actions(5),
        "anomalies": engine.recent_anomalies(5),
        "status": engine.status(),
    })
}
