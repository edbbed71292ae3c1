//! Reconnecting client socket.
//!
//! A [`ClientSocket`] owns a driver task that keeps one WebSocket open at a
//! time. Each transport goes through the same steps:
//!
//! 1. connect, emit [`SocketEvent::Connect`]
//! 2. on ID, store the [`Identity`] and emit [`SocketEvent::Ready`]
//! 3. on PING, answer PONG and re-arm the inactivity timer
//! 4. on close, emit [`SocketEvent::Close`] and decide whether to reconnect
//!
//! A close with [`DISPOSED`](rooms_protocol::DISPOSED) "disposed" ends the
//! socket for good, as does [`ClientSocket::close`] or running out of
//! reconnect attempts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use rooms_protocol::{
    ABNORMAL, Envelope, KEEPALIVE_TIMEOUT, MessageType, NORMAL, PONG_FRAME, decode_envelope,
    encode_envelope, is_terminal,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::errors::{ClientError, Result};
use crate::events::{Event, EventRegistry, ListenerId};
use crate::options::ClientOptions;

/// Close code reported when the peer closed without a status.
pub const NO_STATUS: u16 = 1005;

const KEEPALIVE_REASON: &str = "keepalive timeout";

/// Identity assigned by the server in the ID frame.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Identity {
    /// Connection id.
    pub id: String,
    /// Namespace the connection belongs to.
    pub ns: String,
}

/// Something that happened on a [`ClientSocket`].
#[derive(Clone, Debug, PartialEq)]
pub enum SocketEvent {
    /// A transport opened.
    Connect,
    /// The server sent this connection's identity.
    Ready(Identity),
    /// The server pinged; PONG was already sent.
    Ping,
    /// Any other frame.
    Message(Envelope),
    /// The transport closed.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// A reconnect is starting.
    Reconnect {
        /// 1-based attempt number since the last successful identity.
        attempt: u32,
    },
    /// Transport-level failure.
    Error(String),
}

/// Selector for [`SocketEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketEventKind {
    /// [`SocketEvent::Connect`]
    Connect,
    /// [`SocketEvent::Ready`]
    Ready,
    /// [`SocketEvent::Ping`]
    Ping,
    /// [`SocketEvent::Message`]
    Message,
    /// [`SocketEvent::Close`]
    Close,
    /// [`SocketEvent::Reconnect`]
    Reconnect,
    /// [`SocketEvent::Error`]
    Error,
}

impl Event for SocketEvent {
    type Kind = SocketEventKind;

    fn kind(&self) -> SocketEventKind {
        match self {
            Self::Connect => SocketEventKind::Connect,
            Self::Ready(_) => SocketEventKind::Ready,
            Self::Ping => SocketEventKind::Ping,
            Self::Message(_) => SocketEventKind::Message,
            Self::Close { .. } => SocketEventKind::Close,
            Self::Reconnect { .. } => SocketEventKind::Reconnect,
            Self::Error(_) => SocketEventKind::Error,
        }
    }
}

struct Shared {
    url: String,
    options: ClientOptions,
    events: EventRegistry<SocketEvent>,
    identity: RwLock<Option<Identity>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    shutdown: CancellationToken,
    attempt: AtomicU32,
}

/// A WebSocket connection to a rooms server that survives transport drops.
///
/// Register listeners, then call [`start`](Self::start).
pub struct ClientSocket {
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ClientSocket {
    /// Socket for `url`. Nothing connects until [`start`](Self::start).
    pub fn new(url: &str, options: ClientOptions) -> Result<Self> {
        let url = build_url(url, &options)?;
        Ok(Self {
            shared: Arc::new(Shared {
                url,
                options,
                events: EventRegistry::new(),
                identity: RwLock::new(None),
                outbound: Mutex::new(None),
                shutdown: CancellationToken::new(),
                attempt: AtomicU32::new(0),
            }),
            driver: Mutex::new(None),
        })
    }

    /// Final URL including query parameters and token.
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Spawn the driver. Calling it again, or after [`close`](Self::close),
    /// does nothing.
    pub fn start(&self) {
        let mut driver = self.driver.lock();
        if driver.is_none() && !self.shared.shutdown.is_cancelled() {
            *driver = Some(tokio::spawn(drive(Arc::clone(&self.shared))));
        }
    }

    /// Listen for one kind of event.
    pub fn on(
        &self,
        kind: SocketEventKind,
        listener: impl Fn(&SocketEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.events.on(kind, listener)
    }

    /// Listen for every event.
    pub fn on_any(&self, listener: impl Fn(&SocketEvent) + Send + Sync + 'static) -> ListenerId {
        self.shared.events.on_any(listener)
    }

    /// Remove a listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.shared.events.off(id)
    }

    /// Identity from the latest ID frame.
    pub fn identity(&self) -> Option<Identity> {
        self.shared.identity.read().clone()
    }

    /// Connection id from the latest ID frame.
    pub fn id(&self) -> Option<String> {
        self.shared.identity.read().as_ref().map(|identity| identity.id.clone())
    }

    /// Whether a transport is currently open.
    pub fn is_open(&self) -> bool {
        self.shared.outbound.lock().is_some()
    }

    /// Reconnects since the last identity.
    pub fn attempts(&self) -> u32 {
        self.shared.attempt.load(Ordering::Relaxed)
    }

    /// Send a frame of `kind`. False when no transport is open or the
    /// payload cannot be encoded.
    pub fn send(&self, kind: MessageType, data: Option<&Value>) -> bool {
        encode_envelope(kind, data).is_some_and(|frame| self.send_frame(frame))
    }

    /// Send an already encoded frame.
    pub fn send_frame(&self, frame: Bytes) -> bool {
        self.shared
            .outbound
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Close for good. The open transport, if any, is closed with 1000.
    pub fn close(&self) {
        self.shared.shutdown.cancel();
    }

    /// Wait until the driver has stopped.
    pub async fn closed(&self) {
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for ClientSocket {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

/// Whether to reconnect after a close with `code`/`reason`, given the
/// 1-based `attempt` about to start and the optional cap.
pub fn should_reconnect(code: u16, reason: &str, attempt: u32, max: Option<u32>) -> bool {
    !is_terminal(code, reason) && max.is_none_or(|max| attempt <= max)
}

fn build_url(base: &str, options: &ClientOptions) -> Result<String> {
    let mut url = Url::parse(base)?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(ClientError::UnsupportedScheme(other.to_owned())),
    }
    if !options.params.is_empty() || options.token.is_some() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &options.params {
            let _ = pairs.append_pair(key, value);
        }
        if let Some(token) = &options.token {
            let _ = pairs.append_pair("token", token);
        }
    }
    Ok(url.into())
}

#[instrument(skip_all, fields(url = %shared.url))]
async fn drive(shared: Arc<Shared>) {
    loop {
        let connected = tokio::select! {
            () = shared.shutdown.cancelled() => break,
            result = tokio_tungstenite::connect_async(shared.url.as_str()) => result,
        };
        let (code, reason) = match connected {
            Ok((ws, _)) => {
                debug!("connected");
                let _ = shared.events.emit(&SocketEvent::Connect);
                run_transport(&shared, ws).await
            }
            Err(error) => {
                warn!(%error, "connect failed");
                let _ = shared.events.emit(&SocketEvent::Error(error.to_string()));
                (ABNORMAL, String::new())
            }
        };
        let _ = shared.events.emit(&SocketEvent::Close {
            code,
            reason: reason.clone(),
        });

        if shared.shutdown.is_cancelled() {
            break;
        }
        let attempt = shared.attempt.fetch_add(1, Ordering::Relaxed) + 1;
        if !should_reconnect(code, &reason, attempt, shared.options.attempts) {
            info!(code, %reason, attempt, "not reconnecting");
            break;
        }
        tokio::select! {
            () = shared.shutdown.cancelled() => break,
            () = tokio::time::sleep(shared.options.timeout) => {}
        }
        debug!(attempt, "reconnecting");
        let _ = shared.events.emit(&SocketEvent::Reconnect { attempt });
    }
    shared.events.clear();
}

type Transport = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_owned().into(),
    }))
}

/// Pump one transport until it closes. Returns the close code and reason.
async fn run_transport(shared: &Shared, ws: Transport) -> (u16, String) {
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    *shared.outbound.lock() = Some(tx);

    let ping_interval = shared.options.ping_interval;
    let inactivity = tokio::time::sleep(ping_interval);
    tokio::pin!(inactivity);
    let mut armed = false;

    let closed = loop {
        tokio::select! {
            () = shared.shutdown.cancelled() => {
                let _ = sink.send(close_message(NORMAL, "")).await;
                break (NORMAL, String::new());
            }
            () = &mut inactivity, if armed => {
                warn!("no ping from server, closing");
                let _ = sink.send(close_message(KEEPALIVE_TIMEOUT, KEEPALIVE_REASON)).await;
                break (KEEPALIVE_TIMEOUT, KEEPALIVE_REASON.to_owned());
            }
            Some(frame) = rx.recv() => {
                if sink.send(Message::Binary(frame)).await.is_err() {
                    break (ABNORMAL, String::new());
                }
            }
            message = stream.next() => {
                let decoded = match message {
                    Some(Ok(Message::Binary(data))) => decode_envelope(&data[..]),
                    Some(Ok(Message::Text(text))) => decode_envelope(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map_or((NO_STATUS, String::new()), |frame| {
                            (u16::from(frame.code), frame.reason.as_str().to_owned())
                        });
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(error)) => {
                        debug!(%error, "receive error");
                        break (ABNORMAL, String::new());
                    }
                    None => break (ABNORMAL, String::new()),
                };
                let envelope = match decoded {
                    Ok(envelope) => envelope,
                    Err(error) => {
                        debug!(%error, "dropping undecodable frame");
                        continue;
                    }
                };
                match envelope.kind {
                    MessageType::Ping => {
                        let pong = Message::binary(Bytes::from_static(PONG_FRAME));
                        if sink.send(pong).await.is_err() {
                            break (ABNORMAL, String::new());
                        }
                        inactivity.as_mut().reset(Instant::now() + ping_interval);
                        armed = true;
                        let _ = shared.events.emit(&SocketEvent::Ping);
                    }
                    MessageType::Id => {
                        let identity = envelope
                            .data
                            .map(serde_json::from_value::<Identity>);
                        match identity {
                            Some(Ok(identity)) => {
                                debug!(id = %identity.id, ns = %identity.ns, "identity received");
                                *shared.identity.write() = Some(identity.clone());
                                shared.attempt.store(0, Ordering::Relaxed);
                                let _ = shared.events.emit(&SocketEvent::Ready(identity));
                            }
                            _ => debug!("malformed identity frame"),
                        }
                    }
                    _ => {
                        let _ = shared.events.emit(&SocketEvent::Message(envelope));
                    }
                }
            }
        }
    };

    *shared.outbound.lock() = None;
    closed
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
