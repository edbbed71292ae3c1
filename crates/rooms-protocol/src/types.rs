//! Message type table.
//!
//! Codes are stable on the wire:
//!
//! | Type    | Code |
//! |---------|------|
//! | ID      | 1    |
//! | DATA    | 2    |
//! | EVENT   | 3    |
//! | ERROR   | 4    |
//! | JOIN    | 5    |
//! | LEAVE   | 6    |
//! | DISPOSE | 7    |
//! | PING    | 57   |
//!
//! PONG has no code; it travels as the raw byte `A`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

/// Every kind of frame exchanged between a rooms server and its clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Server-assigned identity, sent once after the handshake.
    Id,
    /// Application payload.
    Data,
    /// Named application event.
    Event,
    /// Error payload `[code, message]`.
    Error,
    /// A participant joined.
    Join,
    /// A participant left.
    Leave,
    /// The room was disposed.
    Dispose,
    /// Server keepalive probe.
    Ping,
    /// Client keepalive answer.
    Pong,
}

impl MessageType {
    /// All message types, in code order.
    pub const ALL: [Self; 9] = [
        Self::Id,
        Self::Data,
        Self::Event,
        Self::Error,
        Self::Join,
        Self::Leave,
        Self::Dispose,
        Self::Ping,
        Self::Pong,
    ];

    /// Numeric code, or `None` for PONG which is never enveloped.
    pub fn code(self) -> Option<u8> {
        match self {
            Self::Id => Some(1),
            Self::Data => Some(2),
            Self::Event => Some(3),
            Self::Error => Some(4),
            Self::Join => Some(5),
            Self::Leave => Some(6),
            Self::Dispose => Some(7),
            Self::Ping => Some(57),
            Self::Pong => None,
        }
    }

    /// Reverse lookup of [`code`](Self::code).
    pub fn from_code(code: u64) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.code().is_some_and(|c| u64::from(c) == code))
    }

    /// Upper-case wire name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Id => "ID",
            Self::Data => "DATA",
            Self::Event => "EVENT",
            Self::Error => "ERROR",
            Self::Join => "JOIN",
            Self::Leave => "LEAVE",
            Self::Dispose => "DISPOSE",
            Self::Ping => "PING",
            Self::Pong => "PONG",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtocolError::UnknownType(s.to_owned()))
    }
}

/// Anything a caller may use to name a message type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeTag<'a> {
    /// Already resolved.
    Kind(MessageType),
    /// Numeric wire code.
    Code(u64),
    /// Name, matched case-insensitively.
    Name(&'a str),
}

impl TypeTag<'_> {
    /// Resolve to a [`MessageType`], or `None` when the tag is unknown.
    pub fn resolve(self) -> Option<MessageType> {
        match self {
            Self::Kind(kind) => Some(kind),
            Self::Code(code) => MessageType::from_code(code),
            Self::Name(name) => name.parse().ok(),
        }
    }
}

impl From<MessageType> for TypeTag<'_> {
    fn from(kind: MessageType) -> Self {
        Self::Kind(kind)
    }
}

impl From<u64> for TypeTag<'_> {
    fn from(code: u64) -> Self {
        Self::Code(code)
    }
}

impl From<u8> for TypeTag<'_> {
    fn from(code: u8) -> Self {
        Self::Code(u64::from(code))
    }
}

impl<'a> From<&'a str> for TypeTag<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
