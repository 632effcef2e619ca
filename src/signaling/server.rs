use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use super::directory::LobbyDirectory;
use super::handler::handle_connection;
use super::registry::PeerRegistry;
use crate::config::ServerConfig;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Shared by every connection task.
#[derive(Debug, Clone)]
pub struct SignalingState {
    config: Arc<ServerConfig>,
    peers: PeerRegistry,
    lobbies: LobbyDirectory,
}

impl SignalingState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            peers: PeerRegistry::new(config.join_timeout),
            lobbies: LobbyDirectory::new(config.max_lobbies, config.seal_grace),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn lobbies(&self) -> &LobbyDirectory {
        &self.lobbies
    }
}

pub struct SignalingServer {
    listener: TcpListener,
    state: SignalingState,
}

impl SignalingServer {
    /// Bind the listener on `config.bind_addr`
    pub async fn bind(config: ServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Signaling server listening on {}", listener.local_addr()?);
        info!(
            "Limits: {} peers, {} lobbies",
            config.max_peers, config.max_lobbies
        );

        Ok(Self {
            listener,
            state: SignalingState::new(config),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, one task per connection
    pub async fn run(self) -> std::io::Result<()> {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            let state = self.state.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, state).await {
                    error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }
}
