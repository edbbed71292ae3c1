//! End-to-end tests over real WebSocket connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rooms_engine::{Engine, MemoryEngine, MemoryHub};
use rooms_protocol::{Envelope, MessageType, PONG_FRAME, decode_envelope, encode_envelope};
use rooms_server::{AuthError, HandlerError, RoomsServer, RouteOptions, ServerConfig, auth_fn};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Joins = Arc<Mutex<Vec<(String, Value)>>>;

const WAIT: Duration = Duration::from_secs(5);

/// Echo room: greets joiners, rebroadcasts data, disposes on request.
fn echo_server(config: ServerConfig, engine: Arc<dyn Engine>, joins: Joins) -> RoomsServer {
    let server = RoomsServer::new(config, engine);
    server
        .room(
            "/:id",
            move |room, _ctx| {
                let joins = Arc::clone(&joins);
                let greeter = room.handle();
                room.on_join(move |id, data| {
                    joins.lock().push((id.clone(), data));
                    let greeter = greeter.clone();
                    async move {
                        greeter.to([id]).send(json!({"message": "joined"})).await?;
                        Ok(())
                    }
                });
                let echo = room.handle();
                room.on_data(move |_id, data| {
                    let echo = echo.clone();
                    let command = data.as_str().map(str::to_owned);
                    async move {
                        match command.as_deref() {
                            Some("dispose") => echo.dispose(),
                            Some("fail") => return Err(HandlerError::new("rejected").with_code(422)),
                            _ => echo.send(data).await?,
                        }
                        Ok(())
                    }
                });
            },
            RouteOptions::new(),
        )
        .unwrap();

    let hook = auth_fn(|token: Option<String>, _req| async move {
        match token.as_deref() {
            Some("secret") => Ok(json!({"name": "alice"})),
            _ => Err(AuthError::default()),
        }
    });
    server
        .room("/private/:id", |_, _| {}, RouteOptions::new().auth(hook))
        .unwrap();
    server
}

async fn start(config: ServerConfig) -> (RoomsServer, SocketAddr, Joins) {
    let joins = Joins::default();
    let server = echo_server(config, Arc::new(MemoryEngine::new()), Arc::clone(&joins));
    let addr = server.listen().await.unwrap();
    (server, addr, joins)
}

async fn connect(addr: SocketAddr, path: &str) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}{path}"))
        .await
        .unwrap();
    ws
}

async fn connect_status(addr: SocketAddr, path: &str) -> u16 {
    match tokio_tungstenite::connect_async(format!("ws://{addr}{path}")).await {
        Ok(_) => 101,
        Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(other) => panic!("unexpected error: {other}"),
    }
}

/// Next envelope other than PING.
async fn next_envelope(ws: &mut Ws) -> Envelope {
    loop {
        let message = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("receive error");
        let envelope = match message {
            Message::Binary(data) => decode_envelope(&data[..]).unwrap(),
            Message::Text(text) => decode_envelope(text.as_str()).unwrap(),
            _ => continue,
        };
        if envelope.kind != MessageType::Ping {
            return envelope;
        }
    }
}

/// Skip frames until one of `kind` arrives.
async fn next_of(ws: &mut Ws, kind: MessageType) -> Envelope {
    loop {
        let envelope = next_envelope(ws).await;
        if envelope.kind == kind {
            return envelope;
        }
    }
}

/// Wait for the close frame and return its code and reason.
async fn close_frame(ws: &mut Ws) -> (u16, String) {
    loop {
        let message = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for close");
        match message {
            Some(Ok(Message::Close(Some(frame)))) => {
                return (u16::from(frame.code), frame.reason.as_str().to_owned());
            }
            Some(Ok(_)) => {}
            other => panic!("connection ended without close frame: {other:?}"),
        }
    }
}

async fn send(ws: &mut Ws, kind: MessageType, data: Value) {
    let frame = encode_envelope(kind, Some(&data)).unwrap();
    ws.send(Message::binary(frame)).await.unwrap();
}

#[tokio::test]
async fn identity_frame_comes_first() {
    let (server, addr, joins) = start(ServerConfig::default()).await;
    let mut ws = connect(addr, "/room1?color=red&token=ignored").await;

    let hello = next_envelope(&mut ws).await;
    assert_eq!(hello.kind, MessageType::Id);
    let hello = hello.data.unwrap();
    assert_eq!(hello["ns"], "/room1");
    let id = hello["id"].as_str().unwrap().to_owned();
    assert_eq!(id.len(), 32);

    let greeting = next_of(&mut ws, MessageType::Event).await;
    assert_eq!(greeting.data, Some(json!({"message": "joined"})));
    assert_eq!(*joins.lock(), vec![(id, json!({"color": "red"}))]);
    server.close().await;
}

#[tokio::test]
async fn data_is_echoed_to_the_room() {
    let (server, addr, _) = start(ServerConfig::default()).await;
    let mut a = connect(addr, "/room1").await;
    let _ = next_of(&mut a, MessageType::Event).await;
    let mut b = connect(addr, "/room1").await;
    let _ = next_of(&mut b, MessageType::Event).await;

    send(&mut a, MessageType::Data, json!({"text": "hello"})).await;

    let expected = Some(json!({"text": "hello"}));
    assert_eq!(next_of(&mut a, MessageType::Event).await.data, expected);
    assert_eq!(next_of(&mut b, MessageType::Event).await.data, expected);
    server.close().await;
}

#[tokio::test]
async fn text_frames_are_data() {
    let (server, addr, _) = start(ServerConfig::default()).await;
    let mut ws = connect(addr, "/room1").await;
    let _ = next_of(&mut ws, MessageType::Event).await;

    ws.send(Message::text("plain")).await.unwrap();
    assert_eq!(next_of(&mut ws, MessageType::Event).await.data, Some(json!("plain")));
    server.close().await;
}

#[tokio::test]
async fn membership_events_reach_other_participants() {
    let (server, addr, _) = start(ServerConfig::default()).await;
    let mut a = connect(addr, "/room1").await;
    let _ = next_of(&mut a, MessageType::Event).await;

    let mut b = connect(addr, "/room1").await;
    let b_id = next_envelope(&mut b).await.data.unwrap()["id"].clone();

    let joined = next_of(&mut a, MessageType::Join).await.data.unwrap();
    assert_eq!(joined["id"], b_id);

    b.close(None).await.unwrap();
    let left = next_of(&mut a, MessageType::Leave).await.data.unwrap();
    assert_eq!(left["id"], b_id);
    server.close().await;
}

#[tokio::test]
async fn handler_error_is_reported_to_sender() {
    let (server, addr, _) = start(ServerConfig::default()).await;
    let mut ws = connect(addr, "/room1").await;
    let _ = next_of(&mut ws, MessageType::Event).await;

    send(&mut ws, MessageType::Data, json!("fail")).await;
    let error = next_of(&mut ws, MessageType::Error).await;
    assert_eq!(error.data, Some(json!([422, "rejected"])));
    server.close().await;
}

#[tokio::test]
async fn unknown_route_is_rejected() {
    let (server, addr, _) = start(ServerConfig::default()).await;
    assert_eq!(connect_status(addr, "/a/b/c").await, 404);
    server.close().await;
}

#[tokio::test]
async fn auth_gates_the_handshake() {
    let (server, addr, _) = start(ServerConfig::default()).await;
    assert_eq!(connect_status(addr, "/private/x").await, 401);
    assert_eq!(connect_status(addr, "/private/x?token=wrong").await, 401);
    assert_eq!(connect_status(addr, "/private/x?token=secret").await, 101);
    server.close().await;
}

#[tokio::test]
async fn server_pings_and_accepts_pong() {
    let config = ServerConfig {
        ping_interval: Duration::from_millis(100),
        keepalive_timeout: Duration::from_millis(200),
        ..ServerConfig::default()
    };
    let (server, addr, _) = start(config).await;
    let mut ws = connect(addr, "/room1").await;

    let deadline = tokio::time::Instant::now() + Duration::from_millis(800);
    let mut pings = 0;
    while tokio::time::Instant::now() < deadline {
        let Ok(Some(Ok(Message::Binary(data)))) =
            tokio::time::timeout(Duration::from_millis(50), ws.next()).await
        else {
            continue;
        };
        if decode_envelope(&data[..]).unwrap().kind == MessageType::Ping {
            pings += 1;
            ws.send(Message::binary(PONG_FRAME.to_vec())).await.unwrap();
        }
    }
    assert!(pings >= 3, "expected several pings, got {pings}");
    assert_eq!(server.manager().clients().connection_count(), 1);
    server.close().await;
}

#[tokio::test]
async fn silent_client_is_closed_with_4001() {
    let config = ServerConfig {
        ping_interval: Duration::from_millis(50),
        keepalive_timeout: Duration::from_millis(100),
        ..ServerConfig::default()
    };
    let (server, addr, _) = start(config).await;
    let mut ws = connect(addr, "/room1").await;
    let (code, reason) = close_frame(&mut ws).await;
    assert_eq!(code, 4001);
    assert_eq!(reason, "keepalive timeout");
    server.close().await;
}

#[tokio::test]
async fn dispose_terminates_connections() {
    let mut config = ServerConfig::default();
    config.rooms.terminate_after = Some(Duration::from_millis(20));
    config.rooms.dispose_grace = Duration::from_millis(20);
    let (server, addr, _) = start(config).await;

    let mut a = connect(addr, "/room1").await;
    let _ = next_of(&mut a, MessageType::Event).await;
    send(&mut a, MessageType::Data, json!("dispose")).await;

    let _ = next_of(&mut a, MessageType::Dispose).await;
    assert_eq!(close_frame(&mut a).await, (4410, "disposed".to_owned()));
    server.close().await;
}

#[tokio::test]
async fn rooms_span_processes_sharing_a_hub() {
    let hub = MemoryHub::new();
    let joins = Joins::default();
    let first = echo_server(
        ServerConfig::default(),
        Arc::new(hub.engine()),
        Arc::clone(&joins),
    );
    let second = echo_server(
        ServerConfig::default(),
        Arc::new(hub.engine()),
        Arc::clone(&joins),
    );
    let first_addr = first.listen().await.unwrap();
    let second_addr = second.listen().await.unwrap();

    let mut a = connect(first_addr, "/shared").await;
    let _ = next_of(&mut a, MessageType::Event).await;
    let mut b = connect(second_addr, "/shared").await;
    let _ = next_of(&mut b, MessageType::Event).await;

    assert_eq!(first.manager().rooms().len(), 1);
    assert_eq!(second.manager().rooms().len(), 0);
    assert_eq!(joins.lock().len(), 2);

    send(&mut b, MessageType::Data, json!("across")).await;
    assert_eq!(next_of(&mut a, MessageType::Event).await.data, Some(json!("across")));
    assert_eq!(next_of(&mut b, MessageType::Event).await.data, Some(json!("across")));

    first.close().await;
    second.close().await;
}

#[tokio::test]
async fn close_sends_going_away() {
    let (server, addr, _) = start(ServerConfig::default()).await;
    let mut ws = connect(addr, "/room1").await;
    let _ = next_of(&mut ws, MessageType::Event).await;

    server.close().await;
    assert_eq!(close_frame(&mut ws).await.0, 1001);
}
