//! Binds connections to rooms and room output to sockets.
//!
//! On admission a connection watches its namespace's event channel. If no
//! process owns the namespace yet (nobody subscribed to its command channel)
//! the room is created here. The connection's JOIN, DATA and LEAVE are then
//! published as commands; the owner applies them in order. Events arriving on
//! the event channel are written to the matching local sockets.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rooms_engine::{Engine, EngineError};
use rooms_protocol::{
    BroadcastOptions, DISPOSED, DISPOSED_REASON, Frame, MessageType, Transform, broadcast,
    decode_envelope,
};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};

use crate::bus::{BusBinding, BusChannel, BusEvent, BusMessage, BusRegistry, command_channel};
use crate::config::RoomConfig;
use crate::registry::RoomRegistry;
use crate::room::{Room, RoomHandle, RoomInput, RoomState};
use crate::routes::Route;
use crate::websocket::clients::ClientRegistry;
use crate::websocket::connection::ClientConnection;

/// Per-recipient rewrite of room output.
pub type ConnectionTransform = Transform<ClientConnection>;

/// Writes bus events to local sockets.
struct EventForwarder {
    clients: Arc<ClientRegistry>,
    terminate_after: Option<Duration>,
    transform: RwLock<Option<Arc<ConnectionTransform>>>,
}

impl EventForwarder {
    fn forward(&self, ns: &str, event: &BusEvent) {
        let transform = self.transform.read().clone();
        let options = BroadcastOptions {
            to: &event.to,
            not: &event.not,
            transform: transform.as_deref(),
        };
        let sent = broadcast(
            self.clients.as_ref(),
            ns,
            event.kind,
            event.data.as_ref(),
            &options,
        );
        trace!(ns, kind = %event.kind, sent, "forwarded room event");

        if event.kind != MessageType::Dispose {
            return;
        }
        if let Some(delay) = self.terminate_after {
            let clients = Arc::clone(&self.clients);
            let ns = ns.to_owned();
            drop(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let closed = clients.close_ns(&ns, DISPOSED, DISPOSED_REASON);
                debug!(ns, closed, "terminated connections of disposed room");
            }));
        }
    }
}

/// Room coordinator for one process.
pub struct Manager {
    engine: Arc<dyn Engine>,
    buses: Arc<BusRegistry>,
    rooms: Arc<RoomRegistry>,
    clients: Arc<ClientRegistry>,
    forwarder: Arc<EventForwarder>,
    config: RoomConfig,
}

impl Manager {
    /// Manager over `engine`, writing to `clients`.
    pub fn new(engine: Arc<dyn Engine>, clients: Arc<ClientRegistry>, config: RoomConfig) -> Self {
        let forwarder = Arc::new(EventForwarder {
            clients: Arc::clone(&clients),
            terminate_after: config.terminate_after,
            transform: RwLock::new(None),
        });
        let sink = Arc::clone(&forwarder);
        let buses = BusRegistry::with_initializer(Arc::clone(&engine), move |bus| {
            let sink = Arc::clone(&sink);
            let ns = bus.ns().to_owned();
            bus.on(BusChannel::Event, move |message| {
                if let BusMessage::Event(event) = message {
                    sink.forward(&ns, event);
                }
            });
        });
        Self {
            engine,
            buses,
            rooms: Arc::new(RoomRegistry::new()),
            clients,
            forwarder,
            config,
        }
    }

    /// Install a per-recipient transform for all room output.
    pub fn set_transform(&self, transform: Arc<ConnectionTransform>) {
        *self.forwarder.transform.write() = Some(transform);
    }

    /// Pub/sub engine.
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Bus registry.
    pub fn buses(&self) -> &Arc<BusRegistry> {
        &self.buses
    }

    /// Rooms owned by this process.
    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    /// Local connections.
    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Admit `connection` into its room, creating the room if nobody owns it.
    #[instrument(skip_all, fields(client_id = %connection.id, ns = %connection.identity.ns))]
    pub async fn accept(
        &self,
        connection: &Arc<ClientConnection>,
        route: &Arc<Route>,
    ) -> Result<(), EngineError> {
        let ns = connection.identity.ns.as_str();
        let delay = self.engine.delay_for(ns).await?;
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis(), "admission delayed");
        }

        let bus = self.buses.watch(ns).await?;
        {
            let _guard = self.rooms.lock_creation(ns).await;
            if !self.rooms.contains(ns) && !self.engine.exists(&command_channel(ns)).await? {
                if let Err(error) = self.create_room(connection, route).await {
                    let _ = bus.unwatch().await;
                    return Err(error);
                }
            }
        }

        bus.call(
            &connection.id,
            MessageType::Join,
            Some(connection.identity.join_data()),
        )
        .await
    }

    /// Handle one inbound frame from `connection`.
    pub async fn on_message(&self, connection: &Arc<ClientConnection>, frame: Frame<'_>) {
        let envelope = match decode_envelope(frame) {
            Ok(envelope) => envelope,
            Err(error) => {
                debug!(client_id = %connection.id, %error, "dropping undecodable frame");
                return;
            }
        };
        match envelope.kind {
            MessageType::Pong => connection.mark_alive(),
            kind @ (MessageType::Join | MessageType::Leave | MessageType::Data) => {
                let Some(bus) = self.buses.get(&connection.identity.ns) else {
                    debug!(client_id = %connection.id, "message for namespace without bus");
                    return;
                };
                if let Err(error) = bus.call(&connection.id, kind, envelope.data).await {
                    warn!(client_id = %connection.id, %kind, %error, "failed to publish command");
                }
            }
            other => trace!(client_id = %connection.id, kind = %other, "ignoring frame"),
        }
    }

    /// Connection closed: leave the room and stop watching the namespace.
    #[instrument(skip_all, fields(client_id = %connection.id, ns = %connection.identity.ns))]
    pub async fn on_close(&self, connection: &Arc<ClientConnection>) {
        let Some(bus) = self.buses.get(&connection.identity.ns) else {
            return;
        };
        if let Err(error) = bus.call(&connection.id, MessageType::Leave, None).await {
            warn!(%error, "failed to publish leave");
        }
        if let Err(error) = bus.unwatch().await {
            warn!(%error, "failed to release namespace bus");
        }
    }

    async fn create_room(
        &self,
        connection: &Arc<ClientConnection>,
        route: &Arc<Route>,
    ) -> Result<(), EngineError> {
        let ns = connection.identity.ns.clone();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let bus = self.buses.get_bus(&ns);
        let handle = RoomHandle::new(Arc::clone(&bus), inbox_tx);
        let context = connection.identity.room_context(route);

        let mut room = Room::new(handle.clone(), context.clone(), self.config.room_timeout);
        (route.handler)(&mut room, &context);

        let commands = handle.clone();
        bus.on(BusChannel::Command, move |message| {
            let BusMessage::Command(command) = message else {
                return;
            };
            if !commands.enqueue(RoomInput::Command(command.clone())) {
                debug!(ns = %commands.ns(), "command for finished room dropped");
            }
        });
        let binding = self.buses.bind(&ns).await?;
        let _ = self.rooms.insert(handle);

        metrics::counter!(crate::metrics::ROOMS_CREATED_TOTAL).increment(1);
        metrics::gauge!(crate::metrics::ROOMS_ACTIVE).increment(1.0);
        info!(ns, route = %route.pattern.as_str(), "room created");

        drop(tokio::spawn(run_room(
            room,
            inbox_rx,
            binding,
            Arc::clone(&self.rooms),
            self.config.dispose_grace,
        )));
        Ok(())
    }
}

/// Drive a room until it disposes, then tear it down after `grace`.
async fn run_room(
    mut room: Room,
    mut inbox: mpsc::UnboundedReceiver<RoomInput>,
    binding: BusBinding,
    rooms: Arc<RoomRegistry>,
    grace: Duration,
) {
    let handle = room.handle();
    while let Some(input) = inbox.recv().await {
        match input {
            RoomInput::Command(command) => {
                let origin = command.id.clone();
                if let Err(error) = room.handle_command(command).await {
                    debug!(ns = %handle.ns(), client_id = %origin, %error, "room command failed");
                    if let Err(error) = handle.to([origin]).send_error(&error.into_payload()).await {
                        warn!(ns = %handle.ns(), %error, "failed to report command error");
                    }
                }
            }
            other => {
                if let Err(error) = room.apply(other).await {
                    warn!(ns = %handle.ns(), %error, "room listener failed");
                }
            }
        }
        if room.state() == RoomState::Disposed {
            break;
        }
    }

    if room.state() != RoomState::Disposed {
        let _ = room.dispose().await;
    }

    // Connections admitted from here on wait until the room is gone and then
    // create a fresh one.
    let creation = rooms.lock_creation(handle.ns()).await;
    tokio::time::sleep(grace).await;
    if let Some(lifetime) = rooms.remove(handle.ns()) {
        metrics::counter!(crate::metrics::ROOMS_DISPOSED_TOTAL).increment(1);
        metrics::gauge!(crate::metrics::ROOMS_ACTIVE).decrement(1.0);
        info!(ns = %handle.ns(), lifetime_ms = lifetime.as_millis(), "room torn down");
    }
    let _ = binding.unbind().await;
    drop(creation);
    rooms.prune_creation(handle.ns());
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
