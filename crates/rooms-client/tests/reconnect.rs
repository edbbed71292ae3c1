//! Client behavior against a scripted server and a real rooms server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rooms_client::{
    ClientEvent, ClientOptions, ClientSocket, Event, RoomClient, SocketEvent, SocketEventKind,
};
use rooms_engine::MemoryEngine;
use rooms_protocol::{DISPOSED, MessageType, PONG_FRAME, encode_envelope};
use rooms_server::{RoomsServer, RouteOptions, ServerConfig};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

type ServerWs = WebSocketStream<TcpStream>;

const WAIT: Duration = Duration::from_secs(5);

/// Accepts WebSocket connections and hands each one to the test.
async fn scripted_server() -> (SocketAddr, mpsc::UnboundedReceiver<ServerWs>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let _accept = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                let _ = tx.send(ws);
            }
        }
    });
    (addr, rx)
}

async fn next_conn(rx: &mut mpsc::UnboundedReceiver<ServerWs>) -> ServerWs {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for connection")
        .expect("server stopped")
}

async fn push(ws: &mut ServerWs, kind: MessageType, data: Option<Value>) {
    let frame = encode_envelope(kind, data.as_ref()).unwrap();
    ws.send(Message::binary(frame)).await.unwrap();
}

async fn hello(ws: &mut ServerWs, id: &str) {
    push(ws, MessageType::Id, Some(json!({"id": id, "ns": "/room1"}))).await;
}

async fn close_with(ws: &mut ServerWs, code: u16, reason: &str) {
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_owned().into(),
    };
    let _ = ws.close(Some(frame)).await;
}

fn recorder(socket: &ClientSocket) -> mpsc::UnboundedReceiver<SocketEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = socket.on_any(move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

async fn wait_for<T>(rx: &mut mpsc::UnboundedReceiver<T>, mut matches: impl FnMut(&T) -> bool) -> T {
    tokio::time::timeout(WAIT, async {
        loop {
            let item = rx.recv().await.expect("event stream ended");
            if matches(&item) {
                return item;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn url(addr: SocketAddr) -> String {
    format!("ws://{addr}/room1")
}

fn fast() -> ClientOptions {
    ClientOptions::new().timeout(Duration::from_millis(20))
}

#[tokio::test]
async fn identity_and_pong() {
    let (addr, mut conns) = scripted_server().await;
    let socket = ClientSocket::new(&url(addr), fast()).unwrap();
    let mut events = recorder(&socket);
    socket.start();

    let mut ws = next_conn(&mut conns).await;
    hello(&mut ws, "abc").await;
    let ready = wait_for(&mut events, |e| matches!(e, SocketEvent::Ready(_))).await;
    assert_eq!(ready, SocketEvent::Ready(rooms_client::Identity { id: "abc".into(), ns: "/room1".into() }));
    assert_eq!(socket.id().as_deref(), Some("abc"));
    assert!(socket.is_open());

    push(&mut ws, MessageType::Ping, None).await;
    let reply = tokio::time::timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(reply, Message::binary(PONG_FRAME.to_vec()));
    let _ = wait_for(&mut events, |e| *e == SocketEvent::Ping).await;

    socket.close();
    socket.closed().await;
}

#[tokio::test]
async fn frames_reach_the_server() {
    let (addr, mut conns) = scripted_server().await;
    let socket = ClientSocket::new(&url(addr), fast()).unwrap();
    let mut events = recorder(&socket);
    socket.start();

    let mut ws = next_conn(&mut conns).await;
    hello(&mut ws, "abc").await;
    let _ = wait_for(&mut events, |e| matches!(e, SocketEvent::Ready(_))).await;

    assert!(socket.send(MessageType::Data, Some(&json!("hi"))));
    let frame = tokio::time::timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    let Message::Binary(data) = frame else { panic!("expected binary frame") };
    let envelope = rooms_protocol::decode_envelope(&data[..]).unwrap();
    assert_eq!(envelope.kind, MessageType::Data);
    assert_eq!(envelope.data, Some(json!("hi")));

    push(&mut ws, MessageType::Event, Some(json!({"x": 1}))).await;
    let message = wait_for(&mut events, |e| matches!(e, SocketEvent::Message(_))).await;
    let SocketEvent::Message(envelope) = message else { unreachable!() };
    assert_eq!(envelope.data, Some(json!({"x": 1})));

    socket.close();
    socket.closed().await;
}

#[tokio::test]
async fn reconnects_after_keepalive_close() {
    let (addr, mut conns) = scripted_server().await;
    let socket = ClientSocket::new(&url(addr), fast()).unwrap();
    let mut events = recorder(&socket);
    socket.start();

    let mut first = next_conn(&mut conns).await;
    hello(&mut first, "one").await;
    close_with(&mut first, 4001, "keepalive timeout").await;

    let close = wait_for(&mut events, |e| matches!(e, SocketEvent::Close { .. })).await;
    assert_eq!(close, SocketEvent::Close { code: 4001, reason: "keepalive timeout".into() });
    let again = wait_for(&mut events, |e| matches!(e, SocketEvent::Reconnect { .. })).await;
    assert_eq!(again, SocketEvent::Reconnect { attempt: 1 });

    let mut second = next_conn(&mut conns).await;
    hello(&mut second, "two").await;
    let _ = wait_for(&mut events, |e| matches!(e, SocketEvent::Ready(_))).await;
    assert_eq!(socket.id().as_deref(), Some("two"));
    assert_eq!(socket.attempts(), 0);

    socket.close();
    socket.closed().await;
}

#[tokio::test]
async fn disposed_close_is_final() {
    let (addr, mut conns) = scripted_server().await;
    let socket = ClientSocket::new(&url(addr), fast()).unwrap();
    let mut events = recorder(&socket);
    socket.start();

    let mut ws = next_conn(&mut conns).await;
    hello(&mut ws, "one").await;
    close_with(&mut ws, DISPOSED, "disposed").await;

    let close = wait_for(&mut events, |e| matches!(e, SocketEvent::Close { .. })).await;
    assert_eq!(close, SocketEvent::Close { code: DISPOSED, reason: "disposed".into() });
    tokio::time::timeout(WAIT, socket.closed()).await.unwrap();
    assert!(!socket.is_open());
    assert!(tokio::time::timeout(Duration::from_millis(200), conns.recv()).await.is_err());
}

#[tokio::test]
async fn silent_server_is_closed_with_4001() {
    let (addr, mut conns) = scripted_server().await;
    let options = fast().ping_interval(Duration::from_millis(100));
    let socket = ClientSocket::new(&url(addr), options).unwrap();
    socket.start();

    let mut ws = next_conn(&mut conns).await;
    hello(&mut ws, "one").await;
    push(&mut ws, MessageType::Ping, None).await;

    let close = tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
                Some(Ok(_)) => {}
                other => panic!("unexpected end: {other:?}"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(close, 4001);

    let _second = next_conn(&mut conns).await;
    socket.close();
    socket.closed().await;
}

#[tokio::test]
async fn attempts_are_capped() {
    let (addr, mut conns) = scripted_server().await;
    let socket = ClientSocket::new(&url(addr), fast().attempts(1)).unwrap();
    let mut events = recorder(&socket);
    socket.start();

    let mut first = next_conn(&mut conns).await;
    close_with(&mut first, 1000, "").await;
    let mut second = next_conn(&mut conns).await;
    close_with(&mut second, 1000, "").await;

    tokio::time::timeout(WAIT, socket.closed()).await.unwrap();
    let reconnects = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| e.kind() == SocketEventKind::Reconnect)
        .count();
    assert_eq!(reconnects, 1);
}

#[tokio::test]
async fn room_client_round_trip() {
    let server = RoomsServer::new(ServerConfig::default(), Arc::new(MemoryEngine::new()));
    server
        .room(
            "/:id",
            |room, _ctx| {
                let greeter = room.handle();
                room.on_join(move |id, _data| {
                    let greeter = greeter.clone();
                    async move {
                        greeter.to([id]).send(json!({"message": "joined"})).await?;
                        Ok(())
                    }
                });
                let echo = room.handle();
                room.on_data(move |_id, data| {
                    let echo = echo.clone();
                    async move {
                        echo.send(data).await?;
                        Ok(())
                    }
                });
            },
            RouteOptions::new(),
        )
        .unwrap();
    let addr = server.listen().await.unwrap();

    let client = RoomClient::new(&url(addr), fast().param("color", "red")).unwrap();
    let (tx, mut events) = mpsc::unbounded_channel();
    let _ = client.on_any(move |event| {
        let _ = tx.send(event.clone());
    });
    client.connect();

    let greeting = wait_for(&mut events, |e| matches!(e, ClientEvent::Message(_))).await;
    assert_eq!(greeting, ClientEvent::Message(json!({"message": "joined"})));
    assert!(client.id().is_some());

    assert!(client.send("chat", Some(json!({"text": "hi"}))));
    let echoed = wait_for(&mut events, |e| matches!(e, ClientEvent::Event { .. })).await;
    assert_eq!(
        echoed,
        ClientEvent::Event { name: "chat".into(), data: json!({"text": "hi"}), from: None }
    );

    client.close();
    client.closed().await;
    server.close().await;
}

#[tokio::test]
async fn disposed_room_stops_the_client() {
    let mut config = ServerConfig::default();
    config.rooms.terminate_after = Some(Duration::from_millis(20));
    config.rooms.dispose_grace = Duration::from_millis(20);
    let server = RoomsServer::new(config, Arc::new(MemoryEngine::new()));
    server
        .room(
            "/:id",
            |room, _ctx| {
                let handle = room.handle();
                room.on_data(move |_id, _data| {
                    handle.dispose();
                    async { Ok(()) }
                });
            },
            RouteOptions::new(),
        )
        .unwrap();
    let addr = server.listen().await.unwrap();

    let client = RoomClient::new(&url(addr), fast()).unwrap();
    let (tx, mut events) = mpsc::unbounded_channel();
    let _ = client.on_any(move |event| {
        let _ = tx.send(event.clone());
    });
    client.connect();
    let _ = wait_for(&mut events, |e| matches!(e, ClientEvent::Ready(_))).await;

    assert!(client.socket().send(MessageType::Data, Some(&json!("bye"))));
    let _ = wait_for(&mut events, |e| *e == ClientEvent::Dispose).await;
    let close = wait_for(&mut events, |e| matches!(e, ClientEvent::Close { .. })).await;
    assert_eq!(close, ClientEvent::Close { code: DISPOSED, reason: "disposed".into() });

    tokio::time::timeout(WAIT, client.closed()).await.unwrap();
    assert!(!client.socket().is_open());
    server.close().await;
}
