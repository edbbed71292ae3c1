//! One WebSocket session from upgrade to close.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use rooms_protocol::{
    Frame, GOING_AWAY, INTERNAL_ERROR, KEEPALIVE_TIMEOUT, MessageType, NORMAL, WireSocket,
    encode_envelope,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::manager::Manager;
use crate::routes::Route;

/// Upper bound on flushing queued frames after close.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Keepalive timing for a session.
#[derive(Clone, Copy, Debug)]
pub struct KeepaliveSettings {
    /// Interval between PING frames.
    pub ping_interval: Duration,
    /// Window after which a silent client is closed.
    pub timeout: Duration,
}

/// Run a session.
///
/// The first frame on the wire is always ID `{id, ns}`. The connection is
/// then admitted into its room and inbound frames are handed to the
/// [`Manager`] until either side closes or `shutdown` fires.
#[instrument(skip_all, fields(client_id = %connection.id, ns = %connection.identity.ns))]
pub async fn run_ws_session(
    ws: WebSocket,
    connection: Arc<ClientConnection>,
    mut outbound_rx: mpsc::Receiver<Bytes>,
    route: Arc<Route>,
    manager: Arc<Manager>,
    keepalive: KeepaliveSettings,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let started = Instant::now();

    metrics::counter!(crate::metrics::WS_CONNECTIONS_TOTAL).increment(1);
    metrics::gauge!(crate::metrics::WS_CONNECTIONS_ACTIVE).increment(1.0);

    let identity = json!({ "id": connection.id, "ns": connection.identity.ns });
    let hello = encode_envelope(MessageType::Id, Some(&identity));
    let greeted = match hello {
        Some(frame) => ws_tx.send(Message::Binary(frame)).await.is_ok(),
        None => false,
    };
    if !greeted {
        debug!("client gone before identity was sent");
        finish(started);
        return;
    }
    manager.clients().add(Arc::clone(&connection));
    info!("client connected");

    let writer = Arc::clone(&connection);
    let mut outbound = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                frame = outbound_rx.recv() => match frame {
                    Some(frame) => {
                        if ws_tx.send(Message::Binary(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                () = writer.closed() => {
                    while let Ok(frame) = outbound_rx.try_recv() {
                        if ws_tx.send(Message::Binary(frame)).await.is_err() {
                            return;
                        }
                    }
                    let (code, reason) = writer.close_frame().unwrap_or((NORMAL, String::new()));
                    let close = CloseFrame { code, reason: reason.into() };
                    let _ = ws_tx.send(Message::Close(Some(close))).await;
                    break;
                }
            }
        }
    });

    let heartbeat_cancel = CancellationToken::new();
    let heartbeat = {
        let connection = Arc::clone(&connection);
        let cancel = heartbeat_cancel.clone();
        tokio::spawn(async move {
            let result =
                run_heartbeat(Arc::clone(&connection), keepalive.ping_interval, keepalive.timeout, cancel)
                    .await;
            if result == HeartbeatResult::TimedOut {
                warn!(client_id = %connection.id, "keepalive timeout");
                connection.close(KEEPALIVE_TIMEOUT, "keepalive timeout");
            }
        })
    };

    let admitted = match manager.accept(&connection, &route).await {
        Ok(()) => true,
        Err(error) => {
            warn!(%error, "failed to admit connection");
            connection.close(INTERNAL_ERROR, "room unavailable");
            false
        }
    };

    if admitted {
        loop {
            tokio::select! {
                () = connection.closed() => break,
                () = shutdown.cancelled() => {
                    connection.close(GOING_AWAY, "going away");
                    break;
                }
                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Binary(data))) => {
                        manager.on_message(&connection, Frame::Binary(&data)).await;
                    }
                    Some(Ok(Message::Text(text))) => {
                        manager.on_message(&connection, Frame::Text(text.as_str())).await;
                    }
                    Some(Ok(Message::Pong(_))) => connection.mark_alive(),
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        debug!(code = ?frame.as_ref().map(|f| f.code), "client closed");
                        break;
                    }
                    Some(Err(error)) => {
                        debug!(%error, "websocket receive error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    heartbeat_cancel.cancel();
    let _ = heartbeat.await;
    if admitted {
        manager.on_close(&connection).await;
    }
    let _ = manager.clients().remove(&connection.id);
    connection.close(NORMAL, "");
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut outbound).await.is_err() {
        outbound.abort();
    }

    info!(
        duration_secs = started.elapsed().as_secs(),
        drops = connection.drop_count(),
        "client disconnected"
    );
    finish(started);
}

fn finish(started: Instant) {
    metrics::counter!(crate::metrics::WS_DISCONNECTIONS_TOTAL).increment(1);
    metrics::gauge!(crate::metrics::WS_CONNECTIONS_ACTIVE).decrement(1.0);
    metrics::histogram!(crate::metrics::WS_CONNECTION_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
}
