//! Codec errors.

use thiserror::Error;

/// Failure while encoding or decoding a wire frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not valid MessagePack.
    #[error("decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The value could not be serialized.
    #[error("encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// A type name or code that maps to no [`MessageType`](crate::MessageType).
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Zero-length binary frame.
    #[error("empty frame")]
    Empty,
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ProtocolError>;
