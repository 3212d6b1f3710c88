//! WebSocket viewer sessions — one connected dashboard from upgrade
//! through disconnect.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use gridhub_core::ids::ConnectionId;
use gridhub_core::size::ModuleKey;
use gridhub_core::wire::{ClientMessage, ServerMessage};
use gridhub_engine::Viewer;

use crate::server::AppState;

/// GET /ws — upgrade to a viewer session.
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if state.engine.hub().connection_count() >= state.config.max_connections {
        warn!(
            max = state.config.max_connections,
            "connection limit reached, refusing viewer"
        );
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| run_session(socket, state))
}

/// Run one viewer session.
///
/// 1. Registers a [`Viewer`] handle with the hub
/// 2. Forwards engine frames out through a bounded queue
/// 3. Dispatches incoming subscribe/unsubscribe/command messages
/// 4. Pings on an interval and disconnects on a missed pong deadline
/// 5. Walks the hub's disconnect path on exit
#[instrument(skip_all, fields(conn))]
pub async fn run_session(ws: WebSocket, state: AppState) {
    let conn_id = ConnectionId::new();
    tracing::Span::current().record("conn", conn_id.as_str());

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(state.config.send_queue);
    let viewer = Arc::new(Viewer::new(conn_id.clone(), send_tx));
    state.engine.hub().register(viewer.clone());

    info!("viewer connected");
    counter!("ws_connections_total").increment(1);
    gauge!("ws_connections_active").increment(1.0);

    let ping_interval = state.config.ping_interval();
    let pong_timeout = state.config.pong_timeout();
    let outbound_viewer = viewer.clone();
    let shutdown = state.shutdown.token();

    // Outbound forwarder with periodic ping frames.
    let outbound = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        // Skip the immediate first tick
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                frame = send_rx.recv() => {
                    match frame {
                        Some(text) => {
                            if ws_tx.send(Message::Text(text.as_str().to_owned().into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping.tick() => {
                    if !outbound_viewer.check_alive()
                        && outbound_viewer.last_pong_elapsed() > pong_timeout
                    {
                        warn!("viewer unresponsive for {pong_timeout:?}, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Inbound loop.
    while let Some(Ok(msg)) = ws_rx.next().await {
        let text = match msg {
            Message::Text(ref t) => Some(t.to_string()),
            Message::Binary(ref data) => match std::str::from_utf8(data) {
                Ok(s) => Some(s.to_owned()),
                Err(_) => {
                    debug!(len = data.len(), "non-UTF8 binary frame ignored");
                    None
                }
            },
            Message::Close(_) => {
                debug!("viewer sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                viewer.mark_alive();
                None
            }
        };
        let Some(text) = text else { continue };
        viewer.mark_alive();

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Subscribe { module_id, size }) => {
                state
                    .engine
                    .hub()
                    .subscribe(&conn_id, ModuleKey { module_id, size })
                    .await;
            }
            Ok(ClientMessage::Unsubscribe { module_id, size }) => {
                state
                    .engine
                    .hub()
                    .unsubscribe(&conn_id, &ModuleKey { module_id, size })
                    .await;
            }
            Ok(ClientMessage::Command {
                module_id,
                command,
                payload,
            }) => {
                counter!("module_commands_total").increment(1);
                state
                    .engine
                    .router()
                    .dispatch(&module_id, &command, payload, &viewer)
                    .await;
            }
            Err(e) => {
                debug!(error = %e, "unparseable client message");
                let _ = viewer.send_message(&ServerMessage::error(format!("invalid message: {e}")));
            }
        }
    }

    info!("viewer disconnected");
    counter!("ws_disconnections_total").increment(1);
    gauge!("ws_connections_active").decrement(1.0);
    histogram!("ws_connection_duration_seconds").record(viewer.age().as_secs_f64());
    outbound.abort();
    state.engine.hub().disconnect(&conn_id).await;
}
