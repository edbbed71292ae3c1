//! # rooms-agent
//!
//! Rooms server binary: loads settings, picks an engine and serves a demo
//! echo room until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rooms_engine::{Engine, MemoryEngine, RedisEngine};
use rooms_server::{RoomsServer, RouteOptions, ServerConfig};
use rooms_settings::{EngineKind, RoomsSettings};
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Rooms server.
#[derive(Parser, Debug)]
#[command(name = "rooms-agent", about = "Rooms WebSocket server", version)]
struct Cli {
    /// Settings file (defaults to `$ROOMS_CONFIG` or `./rooms.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Pub/sub engine: `memory` or `redis` (overrides settings).
    #[arg(long)]
    engine: Option<String>,

    /// Redis URL (overrides settings).
    #[arg(long)]
    redis_url: Option<String>,

    /// Log as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Layer command-line flags over loaded settings.
    fn apply(&self, settings: &mut RoomsSettings) -> Result<()> {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(engine) = &self.engine {
            settings.engine.kind = engine.parse::<EngineKind>().context("Invalid --engine")?;
        }
        if let Some(url) = &self.redis_url {
            settings.engine.redis_url.clone_from(url);
        }
        if self.log_json {
            settings.log.json = true;
        }
        Ok(())
    }
}

fn init_logging(settings: &RoomsSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if settings.log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn connect_engine(settings: &RoomsSettings) -> Result<Arc<dyn Engine>> {
    let engine: Arc<dyn Engine> = match settings.engine.kind {
        EngineKind::Memory => Arc::new(MemoryEngine::new()),
        EngineKind::Redis => Arc::new(
            RedisEngine::connect(&settings.engine.redis_url)
                .await
                .with_context(|| format!("Failed to connect to {}", settings.engine.redis_url))?,
        ),
    };
    Ok(engine)
}

/// Register the demo room: greets each joiner and echoes data to everyone.
fn register_echo_room(server: &RoomsServer) -> Result<()> {
    server
        .room(
            "/:id",
            |room, ctx| {
                tracing::info!(ns = %ctx.ns, "echo room created");
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
        .context("Failed to register echo room")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args.config.clone().unwrap_or_else(rooms_settings::settings_path);
    let mut settings = rooms_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings)?;

    init_logging(&settings);

    let engine = connect_engine(&settings).await?;
    let metrics = rooms_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let server = RoomsServer::new(ServerConfig::from(&settings), engine).with_metrics(metrics);
    register_echo_room(&server)?;

    let addr = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        service = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        port = addr.port(),
        engine = %settings.engine.kind,
        "rooms listening on ws://{addr}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["rooms-agent"]);
        let mut settings = RoomsSettings::default();
        cli.apply(&mut settings).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.engine.kind, EngineKind::Memory);
        assert!(!settings.log.json);
    }

    #[test]
    fn cli_overrides() {
        let cli = Cli::parse_from([
            "rooms-agent",
            "--host",
            "127.0.0.1",
            "--port",
            "8080",
            "--engine",
            "REDIS",
            "--redis-url",
            "redis://cache:6379",
            "--log-json",
        ]);
        let mut settings = RoomsSettings::default();
        cli.apply(&mut settings).unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.engine.kind, EngineKind::Redis);
        assert_eq!(settings.engine.redis_url, "redis://cache:6379");
        assert!(settings.log.json);
    }

    #[test]
    fn unknown_engine_is_an_error() {
        let cli = Cli::parse_from(["rooms-agent", "--engine", "kafka"]);
        assert!(cli.apply(&mut RoomsSettings::default()).is_err());
    }

    #[test]
    fn cli_config_path() {
        let cli = Cli::parse_from(["rooms-agent", "--config", "/etc/rooms.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/rooms.json")));
    }

    #[test]
    fn settings_file_feeds_server_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rooms.json");
        std::fs::write(&path, r#"{"server": {"port": 7000}, "rooms": {"roomTimeoutMs": 0}}"#)
            .unwrap();
        let settings = rooms_settings::load_settings_from_path(&path).unwrap();
        let config = ServerConfig::from(&settings);
        assert_eq!(config.port, 7000);
        assert!(config.rooms.room_timeout.is_none());
    }

    #[tokio::test]
    async fn echo_room_registers() {
        let server = RoomsServer::new(ServerConfig::default(), Arc::new(MemoryEngine::new()));
        register_echo_room(&server).unwrap();
    }

    #[tokio::test]
    async fn memory_engine_needs_no_connection() {
        let engine = connect_engine(&RoomsSettings::default()).await.unwrap();
        engine.close().await;
    }
}
