//! The socket seam shared by server connections and test doubles.

use bytes::Bytes;
use serde_json::Value;
use tracing::trace;

use crate::envelope::encode_envelope;
use crate::types::TypeTag;

/// A connected peer that frames can be written to.
pub trait WireSocket: Send + Sync {
    /// Connection id.
    fn id(&self) -> &str;

    /// Namespace the connection belongs to.
    fn ns(&self) -> &str;

    /// Whether the connection currently accepts frames.
    fn is_open(&self) -> bool;

    /// Queue an encoded frame. Returns `false` if it was dropped.
    fn send_frame(&self, frame: Bytes) -> bool;

    /// Close with a code and reason.
    fn close(&self, code: u16, reason: &str);
}

/// What to write after the type tag.
#[derive(Clone, Debug)]
pub enum Outbound<'a> {
    /// No payload.
    Empty,
    /// A value to encode together with the type.
    Value(&'a Value),
    /// A frame that was already encoded, sent as-is.
    Encoded(Bytes),
}

impl<'a> From<Option<&'a Value>> for Outbound<'a> {
    fn from(data: Option<&'a Value>) -> Self {
        data.map_or(Self::Empty, Self::Value)
    }
}

/// Write one frame to `socket`.
///
/// No-op when the socket is not open or the tag does not resolve. Returns
/// whether a frame was queued.
pub fn write_to_socket<'a, S>(socket: &S, tag: impl Into<TypeTag<'a>>, payload: Outbound<'_>) -> bool
where
    S: WireSocket + ?Sized,
{
    if !socket.is_open() {
        trace!(client_id = %socket.id(), "skipping write to closed socket");
        return false;
    }
    let Some(kind) = tag.into().resolve() else {
        return false;
    };
    let frame = match payload {
        Outbound::Encoded(frame) => Some(frame),
        Outbound::Value(data) => encode_envelope(kind, Some(data)),
        Outbound::Empty => encode_envelope(kind, None),
    };
    frame.is_some_and(|frame| socket.send_frame(frame))
}

// ─────────────────────────────────────────────────────────────────────────────
// Test double
// ─────────────────────────────────────────────────────────────────────────────
