//! Bridge session: one end-to-end byte pipe between a relay socket and
//! a fresh connection to the local service.
//!
//! The two copy directions race; whichever finishes first cancels the
//! session token, which tears the other one down. Cleanup is the same
//! for every outcome: close both sockets, return the pooled buffers.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use wsbridge_core::BufferPool;

use super::config::TunnelConfig;
use super::control::{BridgeCommand, WsStream};
use super::error::TunnelError;

/// Write half of the relay socket. Both copy directions and the final
/// cleanup send on it, so it sits behind an async mutex.
type WsSink = Arc<Mutex<SplitSink<WsStream, Message>>>;

/// How long teardown waits for the losing copy direction and the final
/// close frame before giving up on a peer that stopped draining.
const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

/// How a bridge session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEnd {
    /// The local service closed its side of the TCP connection.
    LocalEof,
    /// The relay sent a close notification or went away.
    RelayClosed,
    /// No relay data arrived within the idle timeout.
    IdleTimeout,
    /// The relay sent a non-binary message on the bridge socket.
    ProtocolError,
    /// The outer shutdown signal fired first.
    Cancelled,
}

/// One brokered byte pipe. Sessions are mutually independent: they
/// share nothing but the buffer pool.
pub struct BridgeSession;

impl BridgeSession {
    /// Start a session for `command` without waiting for it.
    ///
    /// This is the isolation boundary: the session's outcome, error or
    /// not, is logged here with the command id and never propagates to
    /// the control channel.
    pub fn spawn(
        command: BridgeCommand,
        config: TunnelConfig,
        pool: BufferPool,
        cancel: CancellationToken,
    ) {
        tokio::spawn(async move {
            info!(id = %command.id, "Starting bridge session");
            match Self::run(&command, &config, pool, cancel).await {
                Ok(end) => info!(id = %command.id, ?end, "Finished bridge session"),
                Err(e) => error!(id = %command.id, error = %e, "Bridge session failed"),
            }
        });
    }

    /// Run a session to completion: dial the bridge socket with the
    /// command's token, dial the local service, then pump bytes both
    /// ways until either direction finishes.
    pub async fn run(
        command: &BridgeCommand,
        config: &TunnelConfig,
        pool: BufferPool,
        cancel: CancellationToken,
    ) -> Result<BridgeEnd, TunnelError> {
        let url = config.bridge_url(&command.token);
        let (socket, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| TunnelError::Connection(e.to_string()))?;
        let tcp = TcpStream::connect(("127.0.0.1", config.forwarding_port)).await?;

        let (ws_sink, ws_stream) = socket.split();
        let ws_sink: WsSink = Arc::new(Mutex::new(ws_sink));
        let (tcp_read, tcp_write) = tcp.into_split();

        // Cancelled the instant either direction completes, so the
        // other one tears down promptly; also a child of the outer
        // shutdown signal.
        let session_cancel = cancel.child_token();

        let mut relay_to_local = tokio::spawn(copy_relay_to_local(
            ws_stream,
            tcp_write,
            Arc::clone(&ws_sink),
            config.idle_timeout,
            session_cancel.clone(),
        ));
        let mut local_to_relay = tokio::spawn(copy_local_to_relay(
            tcp_read,
            Arc::clone(&ws_sink),
            pool,
            session_cancel.clone(),
        ));

        // First direction to finish decides the outcome.
        let (first, second) = tokio::select! {
            r = &mut relay_to_local => (r, &mut local_to_relay),
            r = &mut local_to_relay => (r, &mut relay_to_local),
        };
        session_cancel.cancel();
        if timeout(TEARDOWN_GRACE, &mut *second).await.is_err() {
            second.abort();
        }

        let outcome = first
            .unwrap_or_else(|e| Err(TunnelError::Connection(format!("copy task failed: {e}"))));

        // Most paths already sent their own close frame; this covers
        // the rest, and a repeat close on a closing socket is swallowed.
        let _ = timeout(TEARDOWN_GRACE, try_close(&ws_sink, CloseCode::Normal, "closed")).await;

        outcome
    }
}

/// relay → local: framed relay messages become raw bytes on the TCP
/// stream. Bounded by the idle timeout; hitting it is a normal way for
/// a session to end, not an error.
async fn copy_relay_to_local(
    mut ws_stream: SplitStream<WsStream>,
    mut tcp_write: OwnedWriteHalf,
    ws_sink: WsSink,
    idle_timeout: Duration,
    cancel: CancellationToken,
) -> Result<BridgeEnd, TunnelError> {
    loop {
        let received = tokio::select! {
            () = cancel.cancelled() => return Ok(BridgeEnd::Cancelled),
            r = timeout(idle_timeout, ws_stream.next()) => r,
        };

        let message = match received {
            Err(_elapsed) => {
                try_close(&ws_sink, CloseCode::Normal, "timeout").await;
                return Ok(BridgeEnd::IdleTimeout);
            }
            Ok(None) => return Ok(BridgeEnd::RelayClosed),
            Ok(Some(msg)) => msg?,
        };

        match message {
            // The write is cancellable too: a local service that stops
            // reading must not pin the session past shutdown.
            Message::Binary(data) => tokio::select! {
                () = cancel.cancelled() => return Ok(BridgeEnd::Cancelled),
                r = tcp_write.write_all(&data) => r?,
            },
            Message::Close(_) => {
                try_close(&ws_sink, CloseCode::Normal, "closed").await;
                return Ok(BridgeEnd::RelayClosed);
            }
            Message::Ping(_) | Message::Pong(_) => {}
            _ => {
                try_close(&ws_sink, CloseCode::Protocol, "bad-data").await;
                return Ok(BridgeEnd::ProtocolError);
            }
        }
    }
}

/// local → relay: each non-empty TCP read becomes one binary message.
/// A zero-length read means the local service is done; the relay gets
/// a normal close.
async fn copy_local_to_relay(
    mut tcp_read: OwnedReadHalf,
    ws_sink: WsSink,
    pool: BufferPool,
    cancel: CancellationToken,
) -> Result<BridgeEnd, TunnelError> {
    let mut buf = pool.acquire();
    loop {
        let read = tokio::select! {
            () = cancel.cancelled() => return Ok(BridgeEnd::Cancelled),
            r = tcp_read.read(&mut buf) => r?,
        };

        if read == 0 {
            try_close(&ws_sink, CloseCode::Normal, "closed").await;
            return Ok(BridgeEnd::LocalEof);
        }

        let frame = Message::Binary(buf[..read].to_vec().into());
        tokio::select! {
            () = cancel.cancelled() => return Ok(BridgeEnd::Cancelled),
            r = async { ws_sink.lock().await.send(frame).await } => r?,
        }
    }
}

/// Best-effort close-output on the relay socket; errors are swallowed
/// because the socket may already be closing from the other side.
async fn try_close(ws_sink: &WsSink, code: CloseCode, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = ws_sink.lock().await.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "Close attempt failed");
    }
}
