//! wsbridge daemon
//!
//! Exposes a local TCP service to the public internet by dialing out
//! to a WebSocket relay; no inbound firewall or NAT configuration
//! needed on the machine running the service.

use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use wsbridge_daemon::tunnel::{TunnelClient, TunnelConfig};

#[derive(Parser, Debug)]
#[command(name = "wsbridge-daemon")]
#[command(version, about = "wsbridge daemon - WebSocket reverse tunnel for a local TCP service")]
struct Args {
    /// Relay base URL ending in a slash (e.g. "wss://relay.example.com/")
    #[arg(long, env = "WSBRIDGE_RELAY_URL")]
    relay_url: String,

    /// Client identifier for relay registration
    #[arg(long, env = "WSBRIDGE_CLIENT_ID")]
    client_id: String,

    /// Shared secret for relay registration
    #[arg(long, env = "WSBRIDGE_KEY")]
    key: String,

    /// Loopback TCP port of the service to expose
    #[arg(long, default_value_t = 8080, env = "WSBRIDGE_FORWARDING_PORT")]
    forwarding_port: u16,

    /// Seconds a bridge waits for relay data before closing itself
    #[arg(long, default_value_t = 300, env = "WSBRIDGE_IDLE_TIMEOUT")]
    idle_timeout: u64,

    /// Seconds between control-channel reconnect attempts
    #[arg(long, default_value_t = 5, env = "WSBRIDGE_RETRY_DELAY")]
    retry_delay: u64,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "WSBRIDGE_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "WSBRIDGE_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = format!("wsbridge_daemon={0},wsbridge_core={0}", args.log_level);
    wsbridge_core::tracing_init::init_tracing(&log_filter, args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        relay_url = %args.relay_url,
        forwarding_port = args.forwarding_port,
        "Starting wsbridge-daemon"
    );

    let mut config = TunnelConfig::new(
        args.relay_url,
        args.client_id,
        args.key,
        args.forwarding_port,
    );
    config.idle_timeout = Duration::from_secs(args.idle_timeout);
    config.retry_delay = Duration::from_secs(args.retry_delay);

    let shutdown = CancellationToken::new();
    let client = TunnelClient::new(config);
    let client_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { client.run(shutdown).await }
    });

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    shutdown.cancel();
    let _ = client_handle.await;

    info!("Daemon stopped");
    Ok(())
}
