//! Per-namespace pub/sub bus.
//!
//! Every room namespace `ns` has two channels on the shared [`Engine`]:
//!
//! - `e:{ns}` carries [`BusEvent`]s (room output) to every process with a
//!   connection in the namespace.
//! - `c:{ns}` carries [`BusCommand`]s (participant input) to the single
//!   process that owns the room.
//!
//! Subscriptions are reference-counted: each local connection *watches* the
//! event channel, and the owning room *binds* both channels. The bus is
//! released and forgotten once it has neither watchers nor an owner.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rooms_engine::{Engine, EngineError, MessageHandler};
use rooms_protocol::MessageType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};

/// Name of the event channel for `ns`.
pub fn event_channel(ns: &str) -> String {
    format!("e:{ns}")
}

/// Name of the command channel for `ns`.
pub fn command_channel(ns: &str) -> String {
    format!("c:{ns}")
}

/// Room output addressed to connections in a namespace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    /// Frame type delivered to sockets.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Frame payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Explicit recipients. Empty means everyone in the namespace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    /// Connections to exclude when `to` is empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not: Vec<String>,
}

impl BusEvent {
    /// Event for the whole namespace.
    pub fn new(kind: MessageType, data: Option<Value>) -> Self {
        Self {
            kind,
            data,
            to: Vec::new(),
            not: Vec::new(),
        }
    }
}

/// Participant input routed to the room owner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusCommand {
    /// JOIN, LEAVE or DATA.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Originating connection id.
    pub id: String,
    /// Command payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Which of a namespace's two channels a message came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BusChannel {
    /// `e:{ns}`.
    Event,
    /// `c:{ns}`.
    Command,
}

impl BusChannel {
    /// Engine channel name for `ns`.
    pub fn name(self, ns: &str) -> String {
        match self {
            Self::Event => event_channel(ns),
            Self::Command => command_channel(ns),
        }
    }
}

/// A decoded bus message.
#[derive(Clone, Debug, PartialEq)]
pub enum BusMessage {
    /// From the event channel.
    Event(BusEvent),
    /// From the command channel.
    Command(BusCommand),
}

impl BusMessage {
    /// Channel the message arrived on.
    pub fn channel(&self) -> BusChannel {
        match self {
            Self::Event(_) => BusChannel::Event,
            Self::Command(_) => BusChannel::Command,
        }
    }
}

/// Local listener for decoded bus messages.
pub type BusListener = Arc<dyn Fn(&BusMessage) + Send + Sync>;

/// Callback run once for every bus the registry creates.
pub type BusInitializer = dyn Fn(&Arc<Bus>) + Send + Sync;

#[derive(Default)]
struct Listeners {
    by_channel: HashMap<BusChannel, Vec<BusListener>>,
    any: Vec<BusListener>,
}

impl Listeners {
    fn snapshot(&self, channel: BusChannel) -> Vec<BusListener> {
        self.by_channel
            .get(&channel)
            .into_iter()
            .flatten()
            .chain(self.any.iter())
            .cloned()
            .collect()
    }
}

#[derive(Default)]
struct Membership {
    owner: bool,
    watchers: usize,
    events: bool,
    commands: bool,
    released: bool,
}

/// One namespace's pair of channels on this process.
pub struct Bus {
    ns: String,
    engine: Arc<dyn Engine>,
    registry: Weak<BusRegistry>,
    listeners: RwLock<Listeners>,
    membership: tokio::sync::Mutex<Membership>,
}

impl Bus {
    /// Namespace this bus serves.
    pub fn ns(&self) -> &str {
        &self.ns
    }

    /// Publish an event to every process watching the namespace.
    pub async fn send(&self, event: &BusEvent) -> Result<(), EngineError> {
        let Some(payload) = encode(event) else {
            return Ok(());
        };
        self.engine.publish(&event_channel(&self.ns), payload).await
    }

    /// Publish a command to the room owner.
    pub async fn call(
        &self,
        id: &str,
        kind: MessageType,
        data: Option<Value>,
    ) -> Result<(), EngineError> {
        let command = BusCommand {
            kind,
            id: id.to_owned(),
            data,
        };
        let Some(payload) = encode(&command) else {
            return Ok(());
        };
        metrics::counter!(crate::metrics::BUS_COMMANDS_TOTAL, "kind" => kind.name()).increment(1);
        self.engine.publish(&command_channel(&self.ns), payload).await
    }

    /// Listen to one channel.
    pub fn on(&self, channel: BusChannel, listener: impl Fn(&BusMessage) + Send + Sync + 'static) {
        self.listeners
            .write()
            .by_channel
            .entry(channel)
            .or_default()
            .push(Arc::new(listener));
    }

    /// Listen to both channels.
    pub fn on_any(&self, listener: impl Fn(&BusMessage) + Send + Sync + 'static) {
        self.listeners.write().any.push(Arc::new(listener));
    }

    /// Number of registered local listeners.
    pub fn listener_count(&self) -> usize {
        let listeners = self.listeners.read();
        listeners.any.len() + listeners.by_channel.values().map(Vec::len).sum::<usize>()
    }

    /// Number of connections watching the event channel.
    pub async fn watchers(&self) -> usize {
        self.membership.lock().await.watchers
    }

    /// Whether a room on this process currently owns the namespace.
    pub async fn is_owned(&self) -> bool {
        self.membership.lock().await.owner
    }

    /// Whether this bus has been torn down.
    pub async fn is_released(&self) -> bool {
        self.membership.lock().await.released
    }

    /// Drop one watcher; the bus is released once idle.
    pub async fn unwatch(self: &Arc<Self>) -> Result<(), EngineError> {
        let mut membership = self.membership.lock().await;
        membership.watchers = membership.watchers.saturating_sub(1);
        self.release_if_idle(&mut membership).await
    }

    fn dispatch(&self, channel: BusChannel, payload: &[u8]) {
        let message = match channel {
            BusChannel::Event => serde_json::from_slice(payload).map(BusMessage::Event),
            BusChannel::Command => serde_json::from_slice(payload).map(BusMessage::Command),
        };
        let message = match message {
            Ok(message) => message,
            Err(error) => {
                debug!(ns = %self.ns, ?channel, %error, "dropping undecodable bus message");
                return;
            }
        };
        let listeners = self.listeners.read().snapshot(channel);
        trace!(ns = %self.ns, ?channel, listeners = listeners.len(), "bus message");
        for listener in listeners {
            listener(&message);
        }
    }

    fn handler(self: &Arc<Self>, channel: BusChannel) -> MessageHandler {
        let bus = Arc::downgrade(self);
        Arc::new(move |payload: Bytes| {
            if let Some(bus) = bus.upgrade() {
                bus.dispatch(channel, &payload);
            }
        })
    }

    async fn subscribe(
        self: &Arc<Self>,
        membership: &mut Membership,
        channel: BusChannel,
    ) -> Result<(), EngineError> {
        let subscribed = match channel {
            BusChannel::Event => &mut membership.events,
            BusChannel::Command => &mut membership.commands,
        };
        if !*subscribed {
            self.engine
                .subscribe(&channel.name(&self.ns), self.handler(channel))
                .await?;
            *subscribed = true;
        }
        Ok(())
    }

    async fn try_watch(self: &Arc<Self>) -> Result<bool, EngineError> {
        let mut membership = self.membership.lock().await;
        if membership.released {
            return Ok(false);
        }
        self.subscribe(&mut membership, BusChannel::Event).await?;
        membership.watchers += 1;
        Ok(true)
    }

    async fn try_bind(self: &Arc<Self>) -> Result<bool, EngineError> {
        let mut membership = self.membership.lock().await;
        if membership.released {
            return Ok(false);
        }
        self.subscribe(&mut membership, BusChannel::Event).await?;
        self.subscribe(&mut membership, BusChannel::Command).await?;
        membership.owner = true;
        Ok(true)
    }

    async fn release_owner(self: &Arc<Self>) -> Result<(), EngineError> {
        let mut membership = self.membership.lock().await;
        membership.owner = false;
        let _ = self.listeners.write().by_channel.remove(&BusChannel::Command);
        if membership.commands {
            membership.commands = false;
            self.engine.unsubscribe(&command_channel(&self.ns)).await?;
        }
        self.release_if_idle(&mut membership).await
    }

    async fn release_if_idle(self: &Arc<Self>, membership: &mut Membership) -> Result<(), EngineError> {
        if membership.owner || membership.watchers > 0 || membership.released {
            return Ok(());
        }
        membership.released = true;
        *self.listeners.write() = Listeners::default();
        if let Some(registry) = self.registry.upgrade() {
            registry.forget(self);
        }
        debug!(ns = %self.ns, "bus released");
        if membership.events {
            membership.events = false;
            self.engine.unsubscribe(&event_channel(&self.ns)).await?;
        }
        Ok(())
    }
}

/// Ownership of a namespace's command channel, held by its room.
#[must_use = "dropping a binding without unbind keeps the command channel subscribed"]
pub struct BusBinding {
    bus: Arc<Bus>,
}

impl BusBinding {
    /// The bound bus.
    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// Release ownership on the next scheduling tick.
    ///
    /// Commands already in flight on this tick still reach their listeners.
    pub fn unbind(self) -> tokio::task::JoinHandle<()> {
        let bus = self.bus;
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            if let Err(error) = bus.release_owner().await {
                warn!(ns = %bus.ns, %error, "failed to release room bus");
            }
        })
    }
}

/// All buses on this process, keyed by namespace.
pub struct BusRegistry {
    engine: Arc<dyn Engine>,
    buses: Mutex<HashMap<String, Arc<Bus>>>,
    initializer: Option<Box<BusInitializer>>,
}

impl BusRegistry {
    /// Registry over `engine`.
    pub fn new(engine: Arc<dyn Engine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            buses: Mutex::new(HashMap::new()),
            initializer: None,
        })
    }

    /// Registry that runs `initializer` on every bus it creates.
    pub fn with_initializer(
        engine: Arc<dyn Engine>,
        initializer: impl Fn(&Arc<Bus>) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            buses: Mutex::new(HashMap::new()),
            initializer: Some(Box::new(initializer)),
        })
    }

    /// The engine buses publish to.
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Bus for `ns`, created on first use. Repeated calls return the same bus
    /// until it is released.
    pub fn get_bus(self: &Arc<Self>, ns: &str) -> Arc<Bus> {
        let mut buses = self.buses.lock();
        if let Some(bus) = buses.get(ns) {
            return Arc::clone(bus);
        }
        let bus = Arc::new(Bus {
            ns: ns.to_owned(),
            engine: Arc::clone(&self.engine),
            registry: Arc::downgrade(self),
            listeners: RwLock::new(Listeners::default()),
            membership: tokio::sync::Mutex::new(Membership::default()),
        });
        if let Some(initializer) = &self.initializer {
            initializer(&bus);
        }
        let _ = buses.insert(ns.to_owned(), Arc::clone(&bus));
        trace!(ns, "bus created");
        bus
    }

    /// Existing bus for `ns`, if any.
    pub fn get(&self, ns: &str) -> Option<Arc<Bus>> {
        self.buses.lock().get(ns).cloned()
    }

    /// Watch the event channel of `ns` on behalf of one connection.
    pub async fn watch(self: &Arc<Self>, ns: &str) -> Result<Arc<Bus>, EngineError> {
        loop {
            let bus = self.get_bus(ns);
            if bus.try_watch().await? {
                return Ok(bus);
            }
        }
    }

    /// Take ownership of the command channel of `ns`.
    pub async fn bind(self: &Arc<Self>, ns: &str) -> Result<BusBinding, EngineError> {
        loop {
            let bus = self.get_bus(ns);
            if bus.try_bind().await? {
                return Ok(BusBinding { bus });
            }
        }
    }

    /// Number of live buses.
    pub fn len(&self) -> usize {
        self.buses.lock().len()
    }

    /// Whether no bus is live.
    pub fn is_empty(&self) -> bool {
        self.buses.lock().is_empty()
    }

    fn forget(&self, bus: &Arc<Bus>) {
        let mut buses = self.buses.lock();
        if buses.get(&bus.ns).is_some_and(|current| Arc::ptr_eq(current, bus)) {
            let _ = buses.remove(&bus.ns);
        }
    }
}

fn encode<T: Serialize>(message: &T) -> Option<Bytes> {
    match serde_json::to_vec(message) {
        Ok(payload) => Some(Bytes::from(payload)),
        Err(error) => {
            warn!(%error, "failed to serialize bus message");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
