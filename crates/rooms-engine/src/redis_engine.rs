//! Redis pub/sub engine.
//!
//! One multiplexed connection publishes and runs counters; a dedicated
//! pub/sub connection receives. A dispatcher task routes each incoming
//! message to the handler registered for its channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ::redis::AsyncCommands;
use ::redis::aio::{ConnectionManager, PubSubSink};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backoff::{COUNTER_TTL, backoff_for, delay_key};
use crate::engine::{Engine, MessageHandler};
use crate::errors::{EngineError, Result};

type Handlers = Arc<RwLock<HashMap<String, MessageHandler>>>;

/// Engine backed by a Redis server.
pub struct RedisEngine {
    commands: ConnectionManager,
    sink: Mutex<PubSubSink>,
    handlers: Handlers,
    cancel: CancellationToken,
    dispatcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl RedisEngine {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = ::redis::Client::open(url)?;
        let commands = client.get_connection_manager().await?;
        let (sink, mut stream) = client.get_async_pubsub().await?.split();

        let handlers: Handlers = Arc::default();
        let cancel = CancellationToken::new();
        let routes = handlers.clone();
        let stop = cancel.clone();
        let dispatcher = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    message = stream.next() => {
                        let Some(message) = message else {
                            warn!("redis pub/sub stream ended");
                            break;
                        };
                        let channel = message.get_channel_name();
                        let handler = routes.read().get(channel).cloned();
                        match handler {
                            Some(handler) => handler(Bytes::copy_from_slice(message.get_payload_bytes())),
                            None => trace!(channel, "message for channel without handler"),
                        }
                    }
                }
            }
        });

        info!(url, "redis engine connected");
        Ok(Self {
            commands,
            sink: Mutex::new(sink),
            handlers,
            cancel,
            dispatcher: parking_lot::Mutex::new(Some(dispatcher)),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Engine for RedisEngine {
    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<()> {
        self.ensure_open()?;
        let fresh = self
            .handlers
            .write()
            .insert(channel.to_owned(), handler)
            .is_none();
        if fresh {
            self.sink.lock().await.subscribe(channel).await?;
            debug!(channel, "redis subscribed");
        }
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.ensure_open()?;
        if self.handlers.write().remove(channel).is_some() {
            self.sink.lock().await.unsubscribe(channel).await?;
            debug!(channel, "redis unsubscribed");
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        let mut conn = self.commands.clone();
        let _: () = conn.publish(channel, &payload[..]).await?;
        Ok(())
    }

    async fn exists(&self, channel: &str) -> Result<bool> {
        self.ensure_open()?;
        let mut conn = self.commands.clone();
        let (_, subscribers): (String, u64) = ::redis::cmd("PUBSUB")
            .arg("NUMSUB")
            .arg(channel)
            .query_async(&mut conn)
            .await?;
        Ok(subscribers > 0)
    }

    async fn delay_for(&self, ns: &str) -> Result<Duration> {
        self.ensure_open()?;
        let key = delay_key(ns);
        let mut conn = self.commands.clone();
        let concurrency: u64 = conn.incr(&key, 1).await?;
        let Some(delay) = backoff_for(concurrency) else {
            let ttl = i64::try_from(COUNTER_TTL.as_secs()).unwrap_or(1);
            let _: () = conn.expire(&key, ttl).await?;
            return Ok(Duration::ZERO);
        };
        debug!(ns, concurrency, delay_ms = delay.as_millis(), "delaying admission");
        tokio::time::sleep(delay).await;
        Ok(delay)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.abort();
        }
        self.handlers.write().clear();
        info!("redis engine closed");
    }
}
