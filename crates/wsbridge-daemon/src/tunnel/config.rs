//! Tunnel client configuration.

use std::time::Duration;

/// Configuration for the daemon's connection to the relay.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Relay base URL ending in a slash (e.g. "wss://relay.example.com/").
    /// `register` and `bridge` are appended for the two socket kinds.
    pub endpoint: String,

    /// Client identifier sent during registration.
    pub client_id: String,

    /// Shared secret sent during registration.
    pub key: String,

    /// Loopback TCP port of the service being exposed.
    pub forwarding_port: u16,

    /// How long a bridge waits for relay data before closing itself.
    pub idle_timeout: Duration,

    /// Fixed delay between control-channel reconnect attempts.
    pub retry_delay: Duration,
}

impl TunnelConfig {
    /// Create a tunnel config with required fields and defaults.
    pub fn new(endpoint: String, client_id: String, key: String, forwarding_port: u16) -> Self {
        Self {
            endpoint,
            client_id,
            key,
            forwarding_port,
            idle_timeout: Duration::from_secs(300),
            retry_delay: Duration::from_secs(5),
        }
    }

    /// URL of the registration socket, credentials query-encoded.
    pub(crate) fn register_url(&self) -> String {
        format!(
            "{}register?id={}&key={}",
            self.endpoint,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.key),
        )
    }

    /// URL of the bridge socket for one brokered request.
    pub(crate) fn bridge_url(&self, token: &str) -> String {
        format!("{}bridge?token={}", self.endpoint, urlencoding::encode(token))
    }
}
