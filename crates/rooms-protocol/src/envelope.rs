//! MessagePack envelope codec.
//!
//! A frame is the MessagePack encoding of `[code]` or `[code, data]`. Two
//! exceptions keep the keepalive path cheap: PING travels as the bare scalar
//! `57` and PONG as the single raw byte `A`.
//!
//! Decoding is lenient. Text frames and anything that is not a recognized
//! `[code, data]` pair are surfaced as DATA carrying the whole value.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::errors::{ProtocolError, Result};
use crate::types::{MessageType, TypeTag};

/// Wire code of PING, also the whole PING frame once encoded.
pub const PING_CODE: u8 = 57;

/// The complete PONG frame.
pub const PONG_FRAME: &[u8] = b"A";

/// A decoded frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Resolved message type.
    pub kind: MessageType,
    /// Payload, absent for bare `[code]` frames.
    pub data: Option<Value>,
}

impl Envelope {
    /// Build an envelope.
    pub fn new(kind: MessageType, data: Option<Value>) -> Self {
        Self { kind, data }
    }

    /// Encode this envelope. See [`encode_envelope`].
    pub fn encode(&self) -> Option<Bytes> {
        encode_envelope(self.kind, self.data.as_ref())
    }
}

/// Raw frame as received from a socket.
#[derive(Clone, Copy, Debug)]
pub enum Frame<'a> {
    /// UTF-8 text frame.
    Text(&'a str),
    /// Binary frame.
    Binary(&'a [u8]),
}

impl<'a> From<&'a [u8]> for Frame<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::Binary(bytes)
    }
}

impl<'a> From<&'a str> for Frame<'a> {
    fn from(text: &'a str) -> Self {
        Self::Text(text)
    }
}

/// Encode a frame for `tag`.
///
/// Returns `None` when the tag does not resolve to a known type or the
/// payload cannot be serialized.
pub fn encode_envelope<'a>(tag: impl Into<TypeTag<'a>>, data: Option<&Value>) -> Option<Bytes> {
    let kind = tag.into().resolve()?;
    let encoded = match (kind, kind.code(), data) {
        (MessageType::Pong, _, _) => return Some(Bytes::from_static(PONG_FRAME)),
        (MessageType::Ping, _, _) => rmp_serde::to_vec(&PING_CODE),
        (_, Some(code), Some(data)) => rmp_serde::to_vec(&(code, data)),
        (_, Some(code), None) => rmp_serde::to_vec(&(code,)),
        (_, None, _) => return None,
    };
    match encoded {
        Ok(bytes) => Some(Bytes::from(bytes)),
        Err(error) => {
            warn!(%kind, %error, "failed to encode envelope");
            None
        }
    }
}

/// Decode a raw frame.
pub fn decode_envelope<'a>(frame: impl Into<Frame<'a>>) -> Result<Envelope> {
    match frame.into() {
        Frame::Text(text) => Ok(Envelope::new(
            MessageType::Data,
            Some(Value::String(text.to_owned())),
        )),
        Frame::Binary([]) => Err(ProtocolError::Empty),
        Frame::Binary(PONG_FRAME) => Ok(Envelope::new(MessageType::Pong, None)),
        Frame::Binary(bytes) => {
            let value: Value = rmp_serde::from_slice(bytes)?;
            Ok(interpret(value))
        }
    }
}

fn interpret(value: Value) -> Envelope {
    if value.as_u64() == Some(u64::from(PING_CODE)) {
        return Envelope::new(MessageType::Ping, None);
    }
    let kind = match &value {
        Value::Array(items) if matches!(items.len(), 1 | 2) => {
            items[0].as_u64().and_then(MessageType::from_code)
        }
        _ => None,
    };
    match (kind, value) {
        (Some(MessageType::Ping), _) => Envelope::new(MessageType::Ping, None),
        (Some(kind), Value::Array(mut items)) => {
            let data = if items.len() == 2 { items.pop() } else { None };
            Envelope::new(kind, data)
        }
        (_, value) => Envelope::new(MessageType::Data, Some(value)),
    }
}

/// Error payload, carried on the wire as `[code, message]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u16, String)", into = "(u16, String)")]
pub struct ErrorPayload {
    /// Numeric code, HTTP-like.
    pub code: u16,
    /// Human-readable message.
    pub message: String,
}

impl ErrorPayload {
    /// Code used when none is supplied.
    pub const DEFAULT_CODE: u16 = 400;
    /// Message used when none is supplied.
    pub const DEFAULT_MESSAGE: &'static str = "Unknown error";

    /// Error with the default code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: Self::DEFAULT_CODE,
            message: message.into(),
        }
    }

    /// Override the code.
    #[must_use]
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    /// JSON value in wire order.
    pub fn to_value(&self) -> Value {
        Value::Array(vec![Value::from(self.code), Value::from(self.message.clone())])
    }

    /// Parse a payload received from the wire. Accepts `[code, message]`
    /// and `{code, message}`; missing parts fall back to the defaults.
    pub fn from_value(value: &Value) -> Self {
        let (code, message) = match value {
            Value::Array(items) => (items.first(), items.get(1)),
            Value::Object(map) => (map.get("code"), map.get("message")),
            Value::String(_) => (None, Some(value)),
            _ => (None, None),
        };
        Self {
            code: code
                .and_then(Value::as_u64)
                .and_then(|c| u16::try_from(c).ok())
                .unwrap_or(Self::DEFAULT_CODE),
            message: message
                .and_then(Value::as_str)
                .unwrap_or(Self::DEFAULT_MESSAGE)
                .to_owned(),
        }
    }
}

impl Default for ErrorPayload {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MESSAGE)
    }
}

impl From<(u16, String)> for ErrorPayload {
    fn from((code, message): (u16, String)) -> Self {
        Self { code, message }
    }
}

impl From<ErrorPayload> for (u16, String) {
    fn from(payload: ErrorPayload) -> Self {
        (payload.code, payload.message)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
