//! WebSocket transport adapter using Axum.
//!
//! Completes the upgrade, registers the connection with the manager, feeds
//! inbound frames to dispatch, and drains the connection's outbound queue.

use crate::api::{client_address, is_upgrade_request, ApiError, AppState};
use crate::dispatch;
use axum::{
    extract::{
        ws::rejection::WebSocketUpgradeRejection,
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// WebSocket upgrade handler.
///
/// Requests without an `Upgrade: websocket` header are plain HTTP and get
/// the same 404 as any unknown path.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(_) if !is_upgrade_request(&headers) => return ApiError::NotFound.into_response(),
        Err(rejection) => {
            warn!("Rejected WebSocket upgrade: {}", rejection.body_text());
            return rejection.into_response();
        }
    };

    let address = client_address(&headers, Some(peer));
    ws.on_upgrade(move |socket| handle_socket(socket, state, address))
        .into_response()
}

/// Handle a WebSocket connection from open to close.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, address: String) {
    // Split the socket into sender and receiver
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Handshake is complete: the connection is open from here on
    let (connection_id, mut rx) = state.manager.register();

    counter!("relay_connections_total").increment(1);
    gauge!("relay_active_connections").set(state.manager.connection_count() as f64);

    info!("Connection {} established from {}", connection_id, address);

    // Forward queued frames to the socket, pinging periodically for keepalive
    let ping_every = state.ping_interval;
    let send_task = tokio::spawn(async move {
        let mut ping_interval = interval(ping_every);
        ping_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(text) = frame else { break };
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Handle incoming messages until the transport closes
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                dispatch::handle_frame(&state.manager, &connection_id, text.as_str());
            }
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => dispatch::handle_frame(&state.manager, &connection_id, text),
                Err(e) => warn!("Ignoring non-UTF-8 binary frame from {}: {}", connection_id, e),
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                debug!("Keepalive from {}", connection_id);
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!("WebSocket error for {}: {:?}", connection_id, e);
                break;
            }
        }
    }

    // Closed: stop dispatching and drop subscriptions
    state.manager.unregister(&connection_id);
    send_task.abort();

    counter!("relay_disconnections_total").increment(1);
    gauge!("relay_active_connections").set(state.manager.connection_count() as f64);

    info!("Connection {} closed", connection_id);
}
