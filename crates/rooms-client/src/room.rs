//! Room-level client.

use std::sync::Arc;

use rooms_protocol::{Envelope, ErrorPayload, MessageType};
use serde_json::{Value, json};

use crate::errors::Result;
use crate::events::{Event, EventRegistry, ListenerId};
use crate::options::ClientOptions;
use crate::socket::{ClientSocket, Identity, SocketEvent};

/// Something that happened in the room, as seen by this client.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    /// Identity received; the client is in the room.
    Ready(Identity),
    /// A participant joined.
    Join {
        /// Participant id.
        id: String,
        /// Participant data after the merge.
        data: Value,
    },
    /// A participant left.
    Leave {
        /// Participant id.
        id: String,
    },
    /// The room was disposed.
    Dispose,
    /// A named event, sent as `[name, data, from]`.
    Event {
        /// Event name.
        name: String,
        /// Event payload.
        data: Value,
        /// Sender id, when the room included one.
        from: Option<String>,
    },
    /// An EVENT payload not shaped as `[name, ...]`.
    Message(Value),
    /// The room reported an error.
    Error(ErrorPayload),
    /// The transport closed.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// A reconnect is starting.
    Reconnect {
        /// Attempt number.
        attempt: u32,
    },
}

/// Selector for [`ClientEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ClientEventKind {
    Ready,
    Join,
    Leave,
    Dispose,
    Event,
    Message,
    Error,
    Close,
    Reconnect,
}

impl Event for ClientEvent {
    type Kind = ClientEventKind;

    fn kind(&self) -> ClientEventKind {
        match self {
            Self::Ready(_) => ClientEventKind::Ready,
            Self::Join { .. } => ClientEventKind::Join,
            Self::Leave { .. } => ClientEventKind::Leave,
            Self::Dispose => ClientEventKind::Dispose,
            Self::Event { .. } => ClientEventKind::Event,
            Self::Message(_) => ClientEventKind::Message,
            Self::Error(_) => ClientEventKind::Error,
            Self::Close { .. } => ClientEventKind::Close,
            Self::Reconnect { .. } => ClientEventKind::Reconnect,
        }
    }
}

/// Map a room frame to a client event. `None` for frames rooms don't send.
pub fn client_event(envelope: &Envelope) -> Option<ClientEvent> {
    let data = envelope.data.clone().unwrap_or(Value::Null);
    let event = match envelope.kind {
        MessageType::Join => ClientEvent::Join {
            id: string_field(&data, "id")?,
            data: data.get("data").cloned().unwrap_or(Value::Null),
        },
        MessageType::Leave => ClientEvent::Leave {
            id: string_field(&data, "id")?,
        },
        MessageType::Dispose => ClientEvent::Dispose,
        MessageType::Error => ClientEvent::Error(ErrorPayload::from_value(&data)),
        MessageType::Event => named_event(data),
        _ => return None,
    };
    Some(event)
}

fn string_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn named_event(data: Value) -> ClientEvent {
    let Value::Array(parts) = &data else {
        return ClientEvent::Message(data);
    };
    let Some(name) = parts.first().and_then(Value::as_str) else {
        return ClientEvent::Message(data);
    };
    ClientEvent::Event {
        name: name.to_owned(),
        data: parts.get(1).cloned().unwrap_or(Value::Null),
        from: parts.get(2).and_then(Value::as_str).map(str::to_owned),
    }
}

/// A [`ClientSocket`] joined to one room, surfacing typed [`ClientEvent`]s.
pub struct RoomClient {
    socket: ClientSocket,
    events: Arc<EventRegistry<ClientEvent>>,
}

impl RoomClient {
    /// Client for the room at `url`. Call [`connect`](Self::connect) after
    /// registering listeners.
    pub fn new(url: &str, options: ClientOptions) -> Result<Self> {
        let socket = ClientSocket::new(url, options)?;
        let events = Arc::new(EventRegistry::new());
        let sink = Arc::clone(&events);
        let _ = socket.on_any(move |event| {
            let mapped = match event {
                SocketEvent::Ready(identity) => Some(ClientEvent::Ready(identity.clone())),
                SocketEvent::Message(envelope) => client_event(envelope),
                SocketEvent::Close { code, reason } => Some(ClientEvent::Close {
                    code: *code,
                    reason: reason.clone(),
                }),
                SocketEvent::Reconnect { attempt } => {
                    Some(ClientEvent::Reconnect { attempt: *attempt })
                }
                SocketEvent::Connect | SocketEvent::Ping | SocketEvent::Error(_) => None,
            };
            if let Some(mapped) = mapped {
                let _ = sink.emit(&mapped);
            }
        });
        Ok(Self { socket, events })
    }

    /// Start connecting.
    pub fn connect(&self) {
        self.socket.start();
    }

    /// Underlying socket.
    pub fn socket(&self) -> &ClientSocket {
        &self.socket
    }

    /// Listen for one kind of room event.
    pub fn on(
        &self,
        kind: ClientEventKind,
        listener: impl Fn(&ClientEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.events.on(kind, listener)
    }

    /// Listen for every room event.
    pub fn on_any(&self, listener: impl Fn(&ClientEvent) + Send + Sync + 'static) -> ListenerId {
        self.events.on_any(listener)
    }

    /// Listen for named events called `name`.
    pub fn on_event(
        &self,
        name: impl Into<String>,
        listener: impl Fn(&Value, Option<&str>) + Send + Sync + 'static,
    ) -> ListenerId {
        let name = name.into();
        self.events.on(ClientEventKind::Event, move |event| {
            if let ClientEvent::Event {
                name: got,
                data,
                from,
            } = event
            {
                if *got == name {
                    listener(data, from.as_deref());
                }
            }
        })
    }

    /// Remove a listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.events.off(id)
    }

    /// Send named event `event` to the room as DATA `[event, data]`.
    pub fn send(&self, event: &str, data: Option<Value>) -> bool {
        let payload = match data {
            Some(data) => json!([event, data]),
            None => json!([event]),
        };
        self.socket.send(MessageType::Data, Some(&payload))
    }

    /// Connection id, once ready.
    pub fn id(&self) -> Option<String> {
        self.socket.id()
    }

    /// Leave for good.
    pub fn close(&self) {
        self.socket.close();
        self.events.clear();
    }

    /// Wait until the socket has stopped.
    pub async fn closed(&self) {
        self.socket.closed().await;
    }
}
