//! Tunnel client connecting the daemon to a WebSocket relay.
//!
//! Maintains a persistent control channel with automatic reconnection
//! and spawns an independent bridge session for every command the
//! relay delivers.

pub mod bridge;
pub mod client;
pub mod config;
pub mod control;
pub mod error;

pub use bridge::{BridgeEnd, BridgeSession};
pub use client::TunnelClient;
pub use config::TunnelConfig;
pub use control::{BridgeCommand, ControlChannel};
pub use error::TunnelError;
