//! # rooms-engine
//!
//! Pub/sub backends for the rooms message bus.
//!
//! - [`Engine`]: the async seam (subscribe, publish, existence probe, delay)
//! - [`MemoryEngine`] / [`MemoryHub`]: in-process backend; several engines on
//!   one hub behave like several processes on one broker
//! - [`RedisEngine`]: Redis pub/sub backend for multi-process deployments
//! - [`backoff`]: the admission delay policy shared by both backends

#![deny(unsafe_code)]

pub mod backoff;
pub mod engine;
pub mod errors;
pub mod memory;
pub mod redis_engine;

pub use backoff::{backoff_for, delay_key};
pub use engine::{Engine, MessageHandler};
pub use errors::{EngineError, Result};
pub use memory::{MemoryEngine, MemoryHub};
pub use redis_engine::RedisEngine;
