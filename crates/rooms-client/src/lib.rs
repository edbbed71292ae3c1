//! # rooms-client
//!
//! Client side of rooms.
//!
//! - [`ClientSocket`]: one logical connection that survives transport drops.
//!   It answers server PINGs, closes itself (4001) when pings stop arriving,
//!   and reconnects after any close except 4410 "disposed".
//! - [`RoomClient`]: room-level view on top of the socket, turning envelopes
//!   into typed [`ClientEvent`]s.
//! - [`EventRegistry`]: kind → ordered listeners, plus "any kind" listeners.

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod options;
pub mod room;
pub mod socket;

pub use errors::ClientError;
pub use events::{Event, EventRegistry, ListenerId};
pub use options::ClientOptions;
pub use room::{ClientEvent, ClientEventKind, RoomClient};
pub use socket::{ClientSocket, Identity, SocketEvent, SocketEventKind};
