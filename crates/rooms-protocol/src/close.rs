//! Close codes with protocol meaning.

/// Room disposed, do not reconnect (paired with [`DISPOSED_REASON`]).
///
/// HTTP 410 mapped into the application range, since WebSocket close codes
/// below 1000 are rejected by conforming peers.
pub const DISPOSED: u16 = 4410;

/// Bare HTTP-style code older servers sent for a disposed room.
pub const LEGACY_DISPOSED: u16 = 410;

/// Reason string sent with [`DISPOSED`].
pub const DISPOSED_REASON: &str = "disposed";

/// No keepalive traffic within the allowed window.
pub const KEEPALIVE_TIMEOUT: u16 = 4001;

/// Server shutting down.
pub const GOING_AWAY: u16 = 1001;

/// Normal closure.
pub const NORMAL: u16 = 1000;

/// Connection lost without a close frame.
pub const ABNORMAL: u16 = 1006;

/// Server-side failure while admitting a connection.
pub const INTERNAL_ERROR: u16 = 1011;

/// True when a close tells the client to stay away.
pub fn is_terminal(code: u16, reason: &str) -> bool {
    matches!(code, DISPOSED | LEGACY_DISPOSED) && reason == DISPOSED_REASON
}
