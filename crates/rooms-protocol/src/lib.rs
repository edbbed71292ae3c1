//! # rooms-protocol
//!
//! Wire vocabulary shared by the rooms server and client.
//!
//! - **Message types**: [`MessageType`] with stable numeric codes and
//!   case-insensitive names
//! - **Envelopes**: MessagePack `[code, data]` frames via [`encode_envelope`]
//!   and [`decode_envelope`], plus the single-byte PONG frame
//! - **Sockets**: the [`WireSocket`] seam and [`write_to_socket`]
//! - **Broadcast**: audience selection over a [`ClientSet`] via [`broadcast`]
//! - **Close codes**: [`DISPOSED`] (terminal), [`KEEPALIVE_TIMEOUT`] and
//!   the standard codes the server uses, plus [`is_terminal`]
//! - **IDs**: [`ConnectionId`] for server-assigned connection identities

#![deny(unsafe_code)]

pub mod broadcast;
pub mod close;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod socket;
pub mod types;

pub use broadcast::{BroadcastOptions, ClientSet, Transform, Transformed, broadcast};
pub use close::{
    ABNORMAL, DISPOSED, DISPOSED_REASON, GOING_AWAY, INTERNAL_ERROR, KEEPALIVE_TIMEOUT,
    LEGACY_DISPOSED, NORMAL, is_terminal,
};
pub use envelope::{
    Envelope, ErrorPayload, Frame, PING_CODE, PONG_FRAME, decode_envelope, encode_envelope,
};
pub use errors::ProtocolError;
pub use ids::ConnectionId;
pub use socket::{Outbound, WireSocket, write_to_socket};
pub use types::{MessageType, TypeTag};
