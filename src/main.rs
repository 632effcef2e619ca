use std::time::Duration;

use clap::Parser;
use lobbyist::config::{DEFAULT_MAX_LOBBIES, DEFAULT_MAX_PEERS, DEFAULT_SIGNALING_PORT, ServerConfig};
use lobbyist::signaling::SignalingServer;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// WebSocket lobby relay for P2P signaling
#[derive(Debug, Parser)]
#[command(name = "lobbyist", version)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value_t = format!("0.0.0.0:{}", DEFAULT_SIGNALING_PORT))]
    bind: String,

    /// Maximum number of connected peers
    #[arg(long, default_value_t = DEFAULT_MAX_PEERS)]
    max_peers: usize,

    /// Maximum number of open lobbies
    #[arg(long, default_value_t = DEFAULT_MAX_LOBBIES)]
    max_lobbies: usize,

    /// Milliseconds a new peer has to join a lobby
    #[arg(long, default_value_t = 1000)]
    join_timeout_ms: u64,

    /// Seconds between a seal and the forced close of the lobby
    #[arg(long, default_value_t = 10)]
    seal_grace_secs: u64,

    /// Largest client message in bytes
    #[arg(long, default_value_t = 64 * 1024)]
    max_message_size: usize,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind,
            max_peers: self.max_peers,
            max_lobbies: self.max_lobbies,
            join_timeout: Duration::from_millis(self.join_timeout_ms),
            seal_grace: Duration::from_secs(self.seal_grace_secs),
            max_message_size: self.max_message_size,
            ..ServerConfig::default()
        }
    }
}

const DEFAULT_LOG_LEVEL: &str = "info";

/// `RUST_LOG` when set, otherwise info and above.
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .init();

    let config = Args::parse().into_config();

    println!("   Lobbyist Signaling Relay");
    println!("   Binding to {}", config.bind_addr);
    println!("   Press Ctrl+C to stop\n");

    let server = SignalingServer::bind(config).await?;

    tokio::select! {
        result = server.run() => result,
        result = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            result
        }
    }
}
