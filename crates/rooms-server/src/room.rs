//! A room: participant registry, lifecycle and listener dispatch.
//!
//! A [`Room`] lives on exactly one process (its owner) and is driven by a
//! single task that applies [`RoomInput`]s one at a time, so listeners for one
//! command finish before the next command is looked at.
//!
//! Lifecycle: ACTIVE while anyone is joined, IDLE once the last participant
//! leaves (an idle timer starts), DISPOSED when the timer fires or
//! [`RoomHandle::dispose`] is called. DISPOSED is terminal.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rooms_engine::EngineError;
use rooms_protocol::{ErrorPayload, MessageType};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::{Bus, BusCommand, BusEvent};
use crate::errors::{HandlerError, RoomError};

/// Lifecycle state of a room.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoomState {
    /// At least one participant has joined since the last idle period.
    Active,
    /// Empty; the idle timer may be running.
    Idle,
    /// Terminal.
    Disposed,
}

/// Listener selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoomEventKind {
    /// A participant joined.
    Join,
    /// A participant left.
    Leave,
    /// A participant sent data.
    Data,
    /// The room disposed.
    Dispose,
    /// A command was rejected.
    Error,
}

/// Event delivered to room listeners.
#[derive(Clone, Debug, PartialEq)]
pub enum RoomEvent {
    /// `id` joined with `data`.
    Join {
        /// Connection id.
        id: String,
        /// Data sent with this join.
        data: Value,
    },
    /// `id` left.
    Leave {
        /// Connection id.
        id: String,
    },
    /// `id` sent `data`.
    Data {
        /// Connection id.
        id: String,
        /// Payload.
        data: Value,
    },
    /// The room disposed.
    Dispose,
    /// A command was rejected.
    Error(RoomError),
}

impl RoomEvent {
    /// Selector for this event.
    pub fn kind(&self) -> RoomEventKind {
        match self {
            Self::Join { .. } => RoomEventKind::Join,
            Self::Leave { .. } => RoomEventKind::Leave,
            Self::Data { .. } => RoomEventKind::Data,
            Self::Dispose => RoomEventKind::Dispose,
            Self::Error(_) => RoomEventKind::Error,
        }
    }
}

/// Future returned by a room listener.
pub type ListenerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

/// Room listener.
pub type RoomListener = Arc<dyn Fn(RoomEvent) -> ListenerFuture + Send + Sync>;

#[derive(Default)]
struct RoomListeners {
    by_kind: HashMap<RoomEventKind, Vec<RoomListener>>,
    any: Vec<RoomListener>,
}

impl RoomListeners {
    fn has(&self, kind: RoomEventKind) -> bool {
        !self.any.is_empty() || self.by_kind.get(&kind).is_some_and(|l| !l.is_empty())
    }

    async fn emit(&self, event: RoomEvent) -> Result<(), HandlerError> {
        let listeners = self
            .by_kind
            .get(&event.kind())
            .into_iter()
            .flatten()
            .chain(self.any.iter());
        for listener in listeners {
            listener(event.clone()).await?;
        }
        Ok(())
    }
}

/// Identity of the connection that caused a room to be created.
#[derive(Clone, Debug, Default)]
pub struct RoomContext {
    /// Namespace (request path).
    pub ns: String,
    /// Source of the route pattern that matched.
    pub route: String,
    /// Parameters captured by the pattern.
    pub params: HashMap<String, String>,
    /// Handshake query, `token` removed.
    pub query: Map<String, Value>,
    /// Value returned by the auth hook.
    pub user: Option<Value>,
}

/// A joined participant.
#[derive(Clone, Debug, PartialEq)]
pub struct Participant {
    /// Connection id.
    pub id: String,
    /// Data from every join, shallow-merged.
    pub data: Value,
}

/// Input to a room's task.
#[derive(Debug)]
pub enum RoomInput {
    /// A command from the bus.
    Command(BusCommand),
    /// The idle timer of the given generation expired.
    IdleTimeout {
        /// Timer generation.
        generation: u64,
    },
    /// Dispose now.
    Dispose,
}

/// Recipients of room output.
#[derive(Clone, Debug, Default)]
struct Audience {
    to: Vec<String>,
    not: Vec<String>,
}

/// Cheap, cloneable access to a room from inside listeners.
#[derive(Clone)]
pub struct RoomHandle {
    ns: Arc<str>,
    bus: Arc<Bus>,
    inbox: mpsc::UnboundedSender<RoomInput>,
}

impl RoomHandle {
    /// Handle for the room of `bus`'s namespace, fed through `inbox`.
    pub fn new(bus: Arc<Bus>, inbox: mpsc::UnboundedSender<RoomInput>) -> Self {
        Self {
            ns: Arc::from(bus.ns()),
            bus,
            inbox,
        }
    }

    /// Room namespace.
    pub fn ns(&self) -> &str {
        &self.ns
    }

    /// Bus the room publishes to.
    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// Send an EVENT to everyone in the room.
    pub async fn send(&self, data: impl Into<Value>) -> Result<(), EngineError> {
        self.publish(MessageType::Event, Some(data.into()), Audience::default())
            .await
    }

    /// Send an ERROR to everyone in the room.
    pub async fn send_error(&self, error: &ErrorPayload) -> Result<(), EngineError> {
        self.publish(MessageType::Error, Some(error.to_value()), Audience::default())
            .await
    }

    /// Address only `ids`.
    pub fn to<I, S>(&self, ids: I) -> ScopedSender
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScopedSender {
            handle: self.clone(),
            audience: Audience {
                to: ids.into_iter().map(Into::into).collect(),
                not: Vec::new(),
            },
        }
    }

    /// Address everyone except `ids`.
    pub fn not<I, S>(&self, ids: I) -> ScopedSender
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScopedSender {
            handle: self.clone(),
            audience: Audience {
                to: Vec::new(),
                not: ids.into_iter().map(Into::into).collect(),
            },
        }
    }

    /// Ask the room to dispose. No-op when already disposed.
    pub fn dispose(&self) {
        if self.inbox.send(RoomInput::Dispose).is_err() {
            debug!(ns = %self.ns, "dispose requested after room task ended");
        }
    }

    pub(crate) fn enqueue(&self, input: RoomInput) -> bool {
        self.inbox.send(input).is_ok()
    }

    async fn publish(
        &self,
        kind: MessageType,
        data: Option<Value>,
        audience: Audience,
    ) -> Result<(), EngineError> {
        let event = BusEvent {
            kind,
            data,
            to: audience.to,
            not: audience.not,
        };
        self.bus.send(&event).await
    }
}

impl std::fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomHandle").field("ns", &self.ns).finish_non_exhaustive()
    }
}

/// Room output restricted to an audience. See [`RoomHandle::to`].
pub struct ScopedSender {
    handle: RoomHandle,
    audience: Audience,
}

impl ScopedSender {
    /// Send an EVENT to the audience.
    pub async fn send(self, data: impl Into<Value>) -> Result<(), EngineError> {
        self.handle
            .publish(MessageType::Event, Some(data.into()), self.audience)
            .await
    }

    /// Send an ERROR to the audience.
    pub async fn send_error(self, error: &ErrorPayload) -> Result<(), EngineError> {
        self.handle
            .publish(MessageType::Error, Some(error.to_value()), self.audience)
            .await
    }
}

struct IdleTimer {
    generation: u64,
    task: JoinHandle<()>,
}

/// Room state owned by the room task.
pub struct Room {
    handle: RoomHandle,
    context: RoomContext,
    state: RoomState,
    participants: HashMap<String, Participant>,
    idle_timeout: Option<Duration>,
    idle_timer: Option<IdleTimer>,
    generation: u64,
    listeners: RoomListeners,
}

impl Room {
    /// Fresh ACTIVE room with no participants.
    pub fn new(handle: RoomHandle, context: RoomContext, idle_timeout: Option<Duration>) -> Self {
        Self {
            handle,
            context,
            state: RoomState::Active,
            participants: HashMap::new(),
            idle_timeout,
            idle_timer: None,
            generation: 0,
            listeners: RoomListeners::default(),
        }
    }

    /// Handle for use inside listeners.
    pub fn handle(&self) -> RoomHandle {
        self.handle.clone()
    }

    /// Namespace.
    pub fn ns(&self) -> &str {
        self.handle.ns()
    }

    /// Context of the connection that created the room.
    pub fn context(&self) -> &RoomContext {
        &self.context
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RoomState {
        self.state
    }

    /// Number of joined participants.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether no one is joined.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Participant by connection id.
    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.get(id)
    }

    /// Ids of all joined participants.
    pub fn participant_ids(&self) -> Vec<String> {
        self.participants.keys().cloned().collect()
    }

    /// Whether an idle timer is armed.
    pub fn idle_timer_pending(&self) -> bool {
        self.idle_timer.is_some()
    }

    /// Number of idle timers started so far.
    pub fn idle_timers_started(&self) -> u64 {
        self.generation
    }

    /// Register a listener for one event kind.
    pub fn on<F, Fut>(&mut self, kind: RoomEventKind, listener: F)
    where
        F: Fn(RoomEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.listeners
            .by_kind
            .entry(kind)
            .or_default()
            .push(Arc::new(move |event| -> ListenerFuture { Box::pin(listener(event)) }));
    }

    /// Register a listener for every event.
    pub fn on_any<F, Fut>(&mut self, listener: F)
    where
        F: Fn(RoomEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.listeners
            .any
            .push(Arc::new(move |event| -> ListenerFuture { Box::pin(listener(event)) }));
    }

    /// Listen for joins: `(id, data)`.
    pub fn on_join<F, Fut>(&mut self, listener: F)
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.push(RoomEventKind::Join, move |event| match event {
            RoomEvent::Join { id, data } => Box::pin(listener(id, data)),
            _ => Box::pin(async { Ok(()) }),
        });
    }

    /// Listen for leaves: `(id)`.
    pub fn on_leave<F, Fut>(&mut self, listener: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.push(RoomEventKind::Leave, move |event| match event {
            RoomEvent::Leave { id } => Box::pin(listener(id)),
            _ => Box::pin(async { Ok(()) }),
        });
    }

    /// Listen for data: `(id, data)`.
    pub fn on_data<F, Fut>(&mut self, listener: F)
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.push(RoomEventKind::Data, move |event| match event {
            RoomEvent::Data { id, data } => Box::pin(listener(id, data)),
            _ => Box::pin(async { Ok(()) }),
        });
    }

    /// Listen for dispose.
    pub fn on_dispose<F, Fut>(&mut self, listener: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.push(RoomEventKind::Dispose, move |_| Box::pin(listener()));
    }

    /// Listen for rejected commands.
    pub fn on_error<F, Fut>(&mut self, listener: F)
    where
        F: Fn(RoomError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.push(RoomEventKind::Error, move |event| match event {
            RoomEvent::Error(error) => Box::pin(listener(error)),
            _ => Box::pin(async { Ok(()) }),
        });
    }

    fn push(
        &mut self,
        kind: RoomEventKind,
        listener: impl Fn(RoomEvent) -> ListenerFuture + Send + Sync + 'static,
    ) {
        self.listeners
            .by_kind
            .entry(kind)
            .or_default()
            .push(Arc::new(listener));
    }

    /// Add or update a participant.
    ///
    /// Cancels any pending idle timer and makes the room ACTIVE.
    pub async fn join(&mut self, id: &str, data: Value) -> Result<(), HandlerError> {
        if self.state == RoomState::Disposed {
            debug!(ns = %self.ns(), client_id = id, "join after dispose ignored");
            return Ok(());
        }
        if id.is_empty() {
            return self.reject(RoomError::InvalidId).await;
        }
        self.cancel_idle_timer();
        self.state = RoomState::Active;

        let merged = match self.participants.get_mut(id) {
            Some(participant) => {
                merge(&mut participant.data, data.clone());
                participant.data.clone()
            }
            None => {
                let participant = Participant {
                    id: id.to_owned(),
                    data: data.clone(),
                };
                let _ = self.participants.insert(id.to_owned(), participant);
                data.clone()
            }
        };
        self.announce(MessageType::Join, json!({ "id": id, "data": merged }))
            .await;
        self.listeners
            .emit(RoomEvent::Join {
                id: id.to_owned(),
                data,
            })
            .await
    }

    /// Remove a participant. Unknown ids are ignored.
    ///
    /// When the room becomes empty it goes IDLE and the idle timer starts.
    pub async fn leave(&mut self, id: &str) -> Result<(), HandlerError> {
        if self.state == RoomState::Disposed {
            return Ok(());
        }
        if id.is_empty() {
            return self.reject(RoomError::InvalidId).await;
        }
        if self.participants.remove(id).is_none() {
            return Ok(());
        }
        self.announce(MessageType::Leave, json!({ "id": id })).await;
        let result = self.listeners.emit(RoomEvent::Leave { id: id.to_owned() }).await;
        if self.participants.is_empty() && self.state != RoomState::Disposed {
            self.state = RoomState::Idle;
            self.start_idle_timer();
        }
        result
    }

    /// Deliver data from a participant to the listeners.
    pub async fn data(&mut self, id: &str, data: Value) -> Result<(), HandlerError> {
        if self.state == RoomState::Disposed {
            return Ok(());
        }
        self.listeners
            .emit(RoomEvent::Data {
                id: id.to_owned(),
                data,
            })
            .await
    }

    /// Dispose the room. Idempotent.
    pub async fn dispose(&mut self) -> Result<(), HandlerError> {
        if self.state == RoomState::Disposed {
            return Ok(());
        }
        self.cancel_idle_timer();
        self.participants.clear();
        self.state = RoomState::Disposed;
        debug!(ns = %self.ns(), "room disposed");

        let result = self.listeners.emit(RoomEvent::Dispose).await;
        if let Err(error) = self
            .handle
            .publish(MessageType::Dispose, None, Audience::default())
            .await
        {
            warn!(ns = %self.ns(), %error, "failed to publish dispose");
        }
        result
    }

    /// Apply one command from the bus.
    pub async fn handle_command(&mut self, command: BusCommand) -> Result<(), HandlerError> {
        let BusCommand { kind, id, data } = command;
        match kind {
            MessageType::Join => self.join(&id, data.unwrap_or_else(|| json!({}))).await,
            MessageType::Leave => self.leave(&id).await,
            MessageType::Data => self.data(&id, data.unwrap_or_else(|| json!({}))).await,
            other => {
                debug!(ns = %self.ns(), kind = %other, "ignoring unsupported room command");
                Ok(())
            }
        }
    }

    /// Apply one input. Command errors are returned to the caller, which
    /// knows whom to report them to.
    pub async fn apply(&mut self, input: RoomInput) -> Result<(), HandlerError> {
        match input {
            RoomInput::Command(command) => self.handle_command(command).await,
            RoomInput::IdleTimeout { generation } => self.on_idle_timeout(generation).await,
            RoomInput::Dispose => self.dispose().await,
        }
    }

    async fn on_idle_timeout(&mut self, generation: u64) -> Result<(), HandlerError> {
        let current = self
            .idle_timer
            .as_ref()
            .is_some_and(|timer| timer.generation == generation);
        if !current || self.state != RoomState::Idle || !self.participants.is_empty() {
            return Ok(());
        }
        self.idle_timer = None;
        debug!(ns = %self.ns(), "idle timeout");
        self.dispose().await
    }

    async fn reject(&mut self, error: RoomError) -> Result<(), HandlerError> {
        if !self.listeners.has(RoomEventKind::Error) {
            warn!(ns = %self.ns(), %error, "room command rejected");
        }
        self.listeners.emit(RoomEvent::Error(error)).await
    }

    async fn announce(&self, kind: MessageType, data: Value) {
        if let Err(error) = self.handle.publish(kind, Some(data), Audience::default()).await {
            warn!(ns = %self.ns(), %kind, %error, "failed to publish membership change");
        }
    }

    fn start_idle_timer(&mut self) {
        self.cancel_idle_timer();
        let Some(timeout) = self.idle_timeout else {
            return;
        };
        self.generation += 1;
        let generation = self.generation;
        let handle = self.handle.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = handle.enqueue(RoomInput::IdleTimeout { generation });
        });
        self.idle_timer = Some(IdleTimer { generation, task });
    }

    fn cancel_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.task.abort();
        }
    }
}

impl Drop for Room {
    fn drop(&mut self) {
        self.cancel_idle_timer();
    }
}

/// Shallow-merge `patch` into `target` when both are objects; replace
/// otherwise.
fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => target.extend(patch),
        (target, patch) => *target = patch,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
