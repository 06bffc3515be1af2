//! Tunnel client error types.

/// Errors that can occur in the tunnel client.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Control channel already connected")]
    AlreadyConnected,

    #[error("Control channel not connected")]
    NotConnected,

    #[error("Local service I/O error: {0}")]
    Local(#[from] std::io::Error),
}
