//! The pub/sub seam.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::Result;

/// Callback invoked with each payload published on a subscribed channel.
pub type MessageHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// A pub/sub backend as seen by one process.
///
/// Each engine holds at most one handler per channel; subscribing again
/// replaces it. Payloads published by any engine sharing the backend reach
/// every engine subscribed to the channel, the publisher included.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Register `handler` for `channel`.
    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<()>;

    /// Drop the subscription for `channel`. No-op when not subscribed.
    async fn unsubscribe(&self, channel: &str) -> Result<()>;

    /// Deliver `payload` to every subscriber of `channel`.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()>;

    /// Whether anyone, anywhere, is subscribed to `channel`.
    async fn exists(&self, channel: &str) -> Result<bool>;

    /// Record one admission attempt for `ns` and wait out the resulting
    /// backoff. Returns the delay that was applied.
    async fn delay_for(&self, ns: &str) -> Result<Duration>;

    /// Release backend resources. Further calls fail with
    /// [`EngineError::Closed`](crate::EngineError::Closed).
    async fn close(&self);
}
