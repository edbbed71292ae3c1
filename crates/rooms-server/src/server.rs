//! Axum gateway: `/health`, `/metrics` and WebSocket upgrades on every other
//! path.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::RwLock;
use rooms_engine::Engine;
use rooms_protocol::{ConnectionId, GOING_AWAY};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::errors::RouteError;
use crate::handshake::{HandshakeRequest, verify};
use crate::health::health_check;
use crate::manager::{ConnectionTransform, Manager};
use crate::room::{Room, RoomContext};
use crate::routes::{RouteOptions, RouteTable};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::clients::ClientRegistry;
use crate::websocket::connection::ClientConnection;
use crate::websocket::session::{KeepaliveSettings, run_ws_session};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    manager: Arc<Manager>,
    routes: Arc<RwLock<RouteTable>>,
    config: Arc<ServerConfig>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

/// A rooms server bound to one engine.
pub struct RoomsServer {
    state: AppState,
}

impl RoomsServer {
    /// Server over `engine`. Nothing is bound until [`listen`](Self::listen).
    pub fn new(config: ServerConfig, engine: Arc<dyn Engine>) -> Self {
        let clients = Arc::new(ClientRegistry::new());
        let manager = Arc::new(Manager::new(engine, clients, config.rooms.clone()));
        Self {
            state: AppState {
                manager,
                routes: Arc::new(RwLock::new(RouteTable::new())),
                config: Arc::new(config),
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
                metrics: None,
            },
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Rewrite room output per recipient.
    #[must_use]
    pub fn with_transform(self, transform: Arc<ConnectionTransform>) -> Self {
        self.state.manager.set_transform(transform);
        self
    }

    /// Register a room route.
    ///
    /// `handler` runs once each time a room is created for a namespace
    /// matching `pattern`; it registers the room's listeners. An empty
    /// pattern means `/`.
    pub fn room<F>(&self, pattern: &str, handler: F, options: RouteOptions) -> Result<(), RouteError>
    where
        F: Fn(&mut Room, &RoomContext) + Send + Sync + 'static,
    {
        self.state
            .routes
            .write()
            .add(pattern, Arc::new(handler), options)?;
        info!(pattern, "room route registered");
        Ok(())
    }

    /// Configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Room coordinator.
    pub fn manager(&self) -> &Arc<Manager> {
        &self.state.manager
    }

    /// Build the Axum router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .fallback(ws_handler)
            .with_state(self.state.clone())
    }

    /// Bind and serve in the background. Returns the bound address.
    pub async fn listen(&self) -> std::io::Result<SocketAddr> {
        let config = &self.state.config;
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();

        self.state.shutdown.track(tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(token.cancelled_owned());
            if let Err(error) = serve.await {
                error!(%error, "server error");
            }
        }));
        info!(%addr, "rooms server listening");
        Ok(addr)
    }

    /// Close every connection with 1001, stop serving and close the engine.
    pub async fn close(&self) {
        self.state.shutdown.shutdown();
        let closed = self
            .state
            .manager
            .clients()
            .close_all(GOING_AWAY, "going away");
        self.state.shutdown.drain(None).await;
        self.state.manager.engine().close().await;
        info!(closed, "rooms server closed");
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(health_check(
        state.start_time,
        state.manager.clients().connection_count(),
        state.manager.rooms().len(),
    ))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

async fn ws_handler(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let request = HandshakeRequest {
        path: uri.path().to_owned(),
        query: uri.query().map(str::to_owned),
        headers,
    };
    let routes = state.routes.read().clone();
    let handshake = match verify(&routes, &request).await {
        Ok(handshake) => handshake,
        Err(rejection) => {
            metrics::counter!(
                crate::metrics::HANDSHAKE_REJECTIONS_TOTAL,
                "status" => rejection.status().as_u16().to_string()
            )
            .increment(1);
            debug!(path = %request.path, %rejection, "handshake rejected");
            return rejection.into_response();
        }
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let (tx, rx) = mpsc::channel(state.config.send_buffer);
    let connection = Arc::new(ClientConnection::new(
        ConnectionId::new().into_inner(),
        handshake.identity,
        tx,
    ));
    let keepalive = KeepaliveSettings {
        ping_interval: state.config.ping_interval,
        timeout: state.config.keepalive_timeout,
    };
    let route = handshake.route;
    let manager = Arc::clone(&state.manager);
    let shutdown = state.shutdown.token();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| {
            run_ws_session(socket, connection, rx, route, manager, keepalive, shutdown)
        })
}
