//! Reconnect supervisor owning the control channel lifecycle.

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use wsbridge_core::BufferPool;

use super::config::TunnelConfig;
use super::control::ControlChannel;
use super::error::TunnelError;

/// Bridge copy loops read the local socket in chunks of this size.
const BRIDGE_BUFFER_SIZE: usize = 64 * 1024;

/// Tunnel client that keeps a control channel open to the relay.
pub struct TunnelClient {
    config: TunnelConfig,
    pool: BufferPool,
}

impl TunnelClient {
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config,
            pool: BufferPool::new(BRIDGE_BUFFER_SIZE),
        }
    }

    /// Run until `cancel` fires, reconnecting after every control
    /// channel termination (error or clean close alike) with a fixed
    /// delay between attempts.
    ///
    /// Failures before the first-ever successful registration are
    /// expected startup noise and logged at debug; a drop after that
    /// point was working service and is logged as an error.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ever_connected = false;

        loop {
            if cancel.is_cancelled() {
                info!("Tunnel client shutting down");
                return;
            }

            match self.connect_and_accept(&cancel, &mut ever_connected).await {
                Ok(()) if cancel.is_cancelled() => {
                    debug!("Control channel closed during shutdown");
                }
                Ok(()) => info!("Control channel closed, reconnecting"),
                Err(e) if cancel.is_cancelled() => {
                    debug!(error = %e, "Control channel ended during shutdown");
                }
                Err(e) if ever_connected => error!(error = %e, "Control channel dropped"),
                Err(e) => debug!(error = %e, "Relay not reachable yet"),
            }

            tokio::select! {
                () = sleep(self.config.retry_delay) => {}
                () = cancel.cancelled() => {
                    info!("Tunnel client shutting down");
                    return;
                }
            }
        }
    }

    /// One control-channel cycle: a fresh channel, registration, then
    /// the command loop until it terminates.
    async fn connect_and_accept(
        &self,
        cancel: &CancellationToken,
        ever_connected: &mut bool,
    ) -> Result<(), TunnelError> {
        let mut channel = ControlChannel::new(self.config.clone(), self.pool.clone());
        channel.connect().await?;
        *ever_connected = true;
        channel.accept_commands(cancel).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn tunnel_client_creation() {
        let config = TunnelConfig::new(
            "wss://relay.example.com/".into(),
            "client-1".into(),
            "secret".into(),
            8080,
        );
        let client = TunnelClient::new(config);

        assert_eq!(client.config.client_id, "client-1");
        assert_eq!(client.config.retry_delay, Duration::from_secs(5));
        assert_eq!(client.pool.outstanding(), 0);
    }
}
