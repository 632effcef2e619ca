use std::time::Duration;

pub const DEFAULT_SIGNALING_PORT: u16 = 3479;
pub const DEFAULT_MAX_PEERS: usize = 4096;
pub const DEFAULT_MAX_LOBBIES: usize = 1024;

/// Runtime settings for the relay
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Connections beyond this are closed right after the handshake
    pub max_peers: usize,
    /// Lobby creation is refused beyond this
    pub max_lobbies: usize,
    /// A peer that has not joined a lobby by then is disconnected
    pub join_timeout: Duration,
    /// Delay between a seal and the forced close of remaining members
    pub seal_grace: Duration,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    /// Largest reassembled message accepted from a client
    pub max_message_size: usize,
    /// Per-connection outbound queue length
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_SIGNALING_PORT),
            max_peers: DEFAULT_MAX_PEERS,
            max_lobbies: DEFAULT_MAX_LOBBIES,
            join_timeout: Duration::from_secs(1),
            seal_grace: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            max_message_size: 64 * 1024,
            outbound_queue: 256,
        }
    }
}
