//! # rooms-server
//!
//! Server side of rooms: WebSocket clients join a namespace, the room's
//! handler logic runs on whichever process owns it, and room traffic crosses
//! processes over a pub/sub bus.
//!
//! - [`bus`]: per-namespace event/command channels over an [`Engine`](rooms_engine::Engine)
//! - [`room`]: participant registry and the ACTIVE → IDLE → DISPOSED lifecycle
//! - [`manager`]: binds connections to rooms and bus events to sockets
//! - [`routes`], [`handshake`], [`auth`]: namespace routing and admission
//! - [`server`]: the Axum gateway (`/health`, `/metrics`, WebSocket fallback)
//! - [`websocket`]: per-connection state, client registry, keepalive, session loop

#![deny(unsafe_code)]

pub mod auth;
pub mod bus;
pub mod config;
pub mod errors;
pub mod handshake;
pub mod health;
pub mod manager;
pub mod metrics;
pub mod registry;
pub mod room;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::{AuthError, AuthHook, auth_fn};
pub use config::{RoomConfig, ServerConfig};
pub use errors::{HandlerError, HandshakeError, RoomError, RouteError};
pub use room::{Room, RoomContext, RoomEvent, RoomEventKind, RoomHandle, RoomState};
pub use routes::RouteOptions;
pub use server::RoomsServer;
