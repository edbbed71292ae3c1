//! WebSocket connection handling.

pub mod clients;
pub mod connection;
pub mod heartbeat;
pub mod session;
