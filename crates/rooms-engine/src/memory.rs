//! In-process engine.
//!
//! A [`MemoryHub`] plays the broker. Each [`MemoryEngine`] taken from it
//! plays one process: it owns its own subscriptions, and publishing on the
//! hub reaches every engine subscribed to the channel. A standalone
//! [`MemoryEngine::new`] gets a private hub.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::backoff::{COUNTER_TTL, backoff_for, delay_key};
use crate::engine::{Engine, MessageHandler};
use crate::errors::{EngineError, Result};

struct Counter {
    value: u64,
    expires_at: Instant,
}

#[derive(Default)]
struct HubState {
    channels: HashMap<String, BTreeMap<u64, MessageHandler>>,
    counters: HashMap<String, Counter>,
}

/// Shared broker for a set of [`MemoryEngine`]s.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
    next_engine: Arc<AtomicU64>,
}

impl MemoryHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new engine (a new "process") to this hub.
    pub fn engine(&self) -> MemoryEngine {
        let id = self.next_engine.fetch_add(1, Ordering::Relaxed);
        MemoryEngine {
            hub: self.clone(),
            id,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of engines subscribed to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state.lock().channels.get(channel).map_or(0, BTreeMap::len)
    }

    #[cfg(test)]
    fn counter_count(&self) -> usize {
        self.state.lock().counters.len()
    }

    fn handlers(&self, channel: &str) -> Vec<MessageHandler> {
        self.state
            .lock()
            .channels
            .get(channel)
            .map(|subs| subs.values().cloned().collect())
            .unwrap_or_default()
    }

    fn bump(&self, key: String) -> u64 {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.counters.retain(|_, counter| counter.expires_at > now);
        let counter = state.counters.entry(key).or_insert(Counter {
            value: 0,
            expires_at: now + COUNTER_TTL,
        });
        counter.value += 1;
        counter.value
    }
}

/// One process's view of a [`MemoryHub`].
pub struct MemoryEngine {
    hub: MemoryHub,
    id: u64,
    closed: AtomicBool,
}

impl MemoryEngine {
    /// Engine on a private hub.
    pub fn new() -> Self {
        MemoryHub::new().engine()
    }

    /// The hub this engine publishes to.
    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.hub.state.lock();
        let _ = state
            .channels
            .entry(channel.to_owned())
            .or_default()
            .insert(self.id, handler);
        trace!(engine = self.id, channel, "subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.hub.state.lock();
        if let Some(subs) = state.channels.get_mut(channel) {
            let _ = subs.remove(&self.id);
            if subs.is_empty() {
                let _ = state.channels.remove(channel);
            }
        }
        trace!(engine = self.id, channel, "unsubscribed");
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        for handler in self.hub.handlers(channel) {
            handler(payload.clone());
        }
        Ok(())
    }

    async fn exists(&self, channel: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.hub.subscriber_count(channel) > 0)
    }

    async fn delay_for(&self, ns: &str) -> Result<Duration> {
        self.ensure_open()?;
        let concurrency = self.hub.bump(delay_key(ns));
        let Some(delay) = backoff_for(concurrency) else {
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
        let mut state = self.hub.state.lock();
        state.channels.retain(|_, subs| {
            let _ = subs.remove(&self.id);
            !subs.is_empty()
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
