//! Core library for wsbridge.
//!
//! Shared pieces used by the daemon:
//! - Pooled buffer arena for bridge copy loops
//! - Tracing/logging initialization

pub mod buffer;
pub mod tracing_init;

pub use buffer::{BufferPool, PooledBuf};
