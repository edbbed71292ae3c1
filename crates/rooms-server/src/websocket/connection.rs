//! Per-connection state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use rooms_protocol::WireSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::handshake::Identity;

/// An admitted WebSocket connection.
pub struct ClientConnection {
    /// Connection id, sent to the client in the ID frame.
    pub id: String,
    /// Who the connection is.
    pub identity: Identity,
    /// Outbound frame queue drained by the session's writer task.
    tx: mpsc::Sender<Bytes>,
    /// Whether the client answered the last PING.
    pub is_alive: AtomicBool,
    /// Frames dropped because the queue was full.
    dropped_messages: AtomicU64,
    closed: CancellationToken,
    close_frame: Mutex<Option<(u16, String)>>,
}

impl ClientConnection {
    /// Wrap an outbound queue.
    pub fn new(id: String, identity: Identity, tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            id,
            identity,
            tx,
            is_alive: AtomicBool::new(true),
            dropped_messages: AtomicU64::new(0),
            closed: CancellationToken::new(),
            close_frame: Mutex::new(None),
        }
    }

    /// Frames dropped so far.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record a PONG.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Read and reset the alive flag.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Resolves once [`close`](WireSocket::close) was called.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Whether close was requested.
    pub fn is_closing(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Code and reason passed to the first close call.
    pub fn close_frame(&self) -> Option<(u16, String)> {
        self.close_frame.lock().clone()
    }
}

impl WireSocket for ClientConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn ns(&self) -> &str {
        &self.identity.ns
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.tx.is_closed()
    }

    fn send_frame(&self, frame: Bytes) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped_messages.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::counter!(crate::metrics::BROADCAST_DROPS_TOTAL).increment(1);
                warn!(client_id = %self.id, dropped, "send buffer full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    fn close(&self, code: u16, reason: &str) {
        {
            let mut frame = self.close_frame.lock();
            if frame.is_some() {
                return;
            }
            *frame = Some((code, reason.to_owned()));
        }
        debug!(client_id = %self.id, code, reason, "closing connection");
        self.closed.cancel();
    }
}
