//! Control channel: registration handshake and bridge command delivery.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use wsbridge_core::BufferPool;

use super::bridge::BridgeSession;
use super::config::TunnelConfig;
use super::error::TunnelError;

/// WebSocket connection type produced by `connect_async`.
pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One brokered bridge request, delivered as a JSON text message on
/// the control channel. The token is a single-use capability the relay
/// requires when the bridge socket is opened.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeCommand {
    #[serde(rename = "Id")]
    pub id: String,

    #[serde(rename = "Token")]
    pub token: String,
}

/// The single long-lived relay connection.
///
/// Registers the client, then receives bridge commands until the relay
/// closes, a protocol violation occurs, or the caller cancels. Each
/// command spawns an independent [`BridgeSession`]; a fault inside a
/// session never reaches the command loop.
pub struct ControlChannel {
    config: TunnelConfig,
    pool: BufferPool,
    socket: Option<WsStream>,
    connected: bool,
}

impl ControlChannel {
    pub const fn new(config: TunnelConfig, pool: BufferPool) -> Self {
        Self {
            config,
            pool,
            socket: None,
            connected: false,
        }
    }

    /// Open the registration socket.
    ///
    /// A channel instance registers at most once; a second call is an
    /// invalid-state error even after the socket is gone.
    pub async fn connect(&mut self) -> Result<(), TunnelError> {
        if self.connected {
            return Err(TunnelError::AlreadyConnected);
        }

        let url = self.config.register_url();
        let (socket, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| TunnelError::Connection(e.to_string()))?;

        info!(client_id = %self.config.client_id, "Registered with relay");
        self.socket = Some(socket);
        self.connected = true;
        Ok(())
    }

    /// Receive bridge commands until the relay closes or a fatal error
    /// occurs. Returns `Ok(())` on a clean close (relay close frame or
    /// cancellation); any error has already been mirrored to the relay
    /// with a best-effort close.
    pub async fn accept_commands(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<(), TunnelError> {
        let mut socket = self.socket.take().ok_or(TunnelError::NotConnected)?;

        let result = self.command_loop(&mut socket, cancel).await;
        if result.is_err() {
            // A protocol close may already be in flight; a second close
            // attempt on a closing socket is swallowed.
            try_close(&mut socket, CloseCode::Error, "internal error").await;
        }
        debug!("Disconnecting from relay");
        result
    }

    async fn command_loop(
        &self,
        socket: &mut WsStream,
        cancel: &CancellationToken,
    ) -> Result<(), TunnelError> {
        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => {
                    try_close(socket, CloseCode::Normal, "shutdown").await;
                    return Ok(());
                }
                msg = socket.next() => match msg {
                    None => {
                        return Err(TunnelError::Connection(
                            "control channel ended without close".into(),
                        ));
                    }
                    Some(msg) => msg?,
                },
            };

            match message {
                Message::Text(text) => {
                    let command: BridgeCommand = serde_json::from_str(&text)
                        .map_err(|e| TunnelError::Protocol(format!("bad bridge command: {e}")))?;
                    debug!(id = %command.id, "Received bridge command");
                    BridgeSession::spawn(
                        command,
                        self.config.clone(),
                        self.pool.clone(),
                        cancel.child_token(),
                    );
                }
                Message::Close(frame) => {
                    debug!(?frame, "Control channel closed by relay");
                    try_close(socket, CloseCode::Normal, "closed").await;
                    return Ok(());
                }
                // WS keepalive frames; tungstenite answers pings itself
                Message::Ping(_) | Message::Pong(_) => {}
                _ => {
                    try_close(socket, CloseCode::Protocol, "bad-data").await;
                    return Err(TunnelError::Protocol(
                        "unexpected non-text message on control channel".into(),
                    ));
                }
            }
        }
    }
}

/// Best-effort close-output: failures sending the close frame are
/// swallowed because the peer may already be gone.
async fn try_close(socket: &mut WsStream, code: CloseCode, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "Close attempt failed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bridge_command_parses_relay_schema() {
        let command: BridgeCommand =
            serde_json::from_str(r#"{"Id":"req-7","Token":"abc123"}"#).unwrap();
        assert_eq!(command.id, "req-7");
        assert_eq!(command.token, "abc123");
    }

    #[test]
    fn bridge_command_rejects_wrong_shape() {
        assert!(serde_json::from_str::<BridgeCommand>(r#"{"id":"x","token":"y"}"#).is_err());
        assert!(serde_json::from_str::<BridgeCommand>("not json").is_err());
    }

    #[tokio::test]
    async fn accept_before_connect_is_invalid_state() {
        let config =
            TunnelConfig::new("ws://localhost:1/".into(), "c".into(), "k".into(), 80);
        let mut channel = ControlChannel::new(config, BufferPool::new(64));

        let result = channel.accept_commands(&CancellationToken::new()).await;
        assert!(matches!(result, Err(TunnelError::NotConnected)));
    }
}
