//! WebSocket session lifecycle — handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS,
    WS_DISCONNECTIONS_TOTAL,
};

use super::connection::{Connection, ConnectionId, RelayMessage, TransportState};
use super::relay::BroadcastRelay;

/// Why a session ended. Informational only — unregistration is
/// identical for every reason.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed the connection (or the stream ended).
    Normal,
    /// A transport error ended the connection.
    Error,
    /// The client stopped answering heartbeat pings.
    Timeout,
    /// The server is shutting down.
    Shutdown,
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection so broadcasts can reach it
/// 2. Forwards every inbound text/binary frame to the relay
/// 3. Drains the outbound queue into the socket from a writer task
/// 4. Sends periodic Ping frames and disconnects unresponsive clients
/// 5. Unregisters on disconnect, whatever the reason
pub async fn run_session(
    ws: WebSocket,
    relay: Arc<BroadcastRelay>,
    config: Arc<ServerConfig>,
    cancel: CancellationToken,
) {
    let id = ConnectionId::new();
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (tx, mut rx) = mpsc::channel::<Arc<RelayMessage>>(config.max_send_queue);
    let connection = Arc::new(Connection::new(id.clone(), tx));

    info!(client_id = %id, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    relay.registry().register(Arc::clone(&connection)).await;

    // Writer task: drain the outbound queue into the socket, ping on an
    // interval, and send a Close frame when the server shuts down.
    let writer_conn = Arc::clone(&connection);
    let writer_cancel = cancel.clone();
    let ping_interval = config.ping_interval();
    let pong_timeout = config.pong_timeout();
    let mut writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        let _ = ping.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(msg) => {
                            let frame = match &*msg {
                                RelayMessage::Text(t) => Message::Text(t.clone().into()),
                                RelayMessage::Binary(b) => Message::Binary(b.clone().into()),
                            };
                            if ws_tx.send(frame).await.is_err() {
                                break CloseReason::Error;
                            }
                        }
                        None => break CloseReason::Normal,
                    }
                }
                _ = ping.tick() => {
                    if !writer_conn.is_alive(pong_timeout) {
                        warn!(client_id = %writer_conn.id, "client unresponsive for {pong_timeout:?}, disconnecting");
                        break CloseReason::Timeout;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break CloseReason::Error;
                    }
                }
                () = writer_cancel.cancelled() => {
                    writer_conn.set_state(TransportState::Closing);
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break CloseReason::Shutdown;
                }
            }
        }
    });

    // Reader loop: every inbound frame is an opaque payload to rebroadcast.
    let reason = loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch(&relay, &id, RelayMessage::Text(text.to_string())).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        dispatch(&relay, &id, RelayMessage::Binary(data.to_vec())).await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // axum answers Pings automatically; both frames prove liveness
                        connection.record_pong();
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(client_id = %id, "client sent close frame");
                        break CloseReason::Normal;
                    }
                    Some(Err(e)) => {
                        debug!(client_id = %id, error = %e, "websocket error");
                        break CloseReason::Error;
                    }
                    None => break CloseReason::Normal,
                }
            }
            reason = &mut writer => {
                break reason.unwrap_or(CloseReason::Error);
            }
        }
    };

    info!(client_id = %id, reason = ?reason, "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());

    connection.set_state(TransportState::Closed);
    writer.abort();
    relay.registry().unregister(&id).await;
}

/// Forward one inbound payload to the relay.
#[instrument(skip_all, fields(client_id = %source))]
async fn dispatch(relay: &BroadcastRelay, source: &ConnectionId, message: RelayMessage) {
    relay.relay(source, message).await;
}
