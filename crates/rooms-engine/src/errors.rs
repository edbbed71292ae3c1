//! Engine errors.

use thiserror::Error;

/// Failure talking to a pub/sub backend.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Redis command or connection failure.
    #[error("redis: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// The engine was closed.
    #[error("engine closed")]
    Closed,

    /// Engine name not recognized.
    #[error("unknown engine: {0}")]
    UnknownEngine(String),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, EngineError>;
