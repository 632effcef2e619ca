use std::fmt;
use std::str::FromStr;

use rand::Rng;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use super::messages::ParseError;

/// Signaling server errors
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("peer transport is already closed")]
    InvalidPeer,

    #[error("peer connection is gone")]
    PeerGone,

    #[error("peer {0} is not the lobby host")]
    NotHost(PeerId),

    #[error("lobby {0} is already sealed")]
    AlreadySealed(LobbyCode),

    #[error("lobby {0} is sealed")]
    LobbySealed(LobbyCode),

    #[error("lobby {0} is closed")]
    LobbyClosed(LobbyCode),

    #[error("lobby not found: {0}")]
    LobbyNotFound(LobbyCode),

    #[error("peer {0} already has a lobby")]
    AlreadyInLobby(PeerId),

    #[error("peer {0} is already a member")]
    AlreadyMember(PeerId),

    #[error("peer {0} is not in a lobby")]
    NotInLobby(PeerId),

    #[error("too many lobbies ({0})")]
    TooManyLobbies(usize),

    #[error("unknown destination {0}")]
    UnknownDestination(PeerId),

    #[error("malformed message: {0}")]
    Malformed(#[from] ParseError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The externally-visible id every lobby member uses to address its host.
pub const HOST_ID: PeerId = PeerId(1);

const LOBBY_CODE_CHARS: &[u8] = b"0123456789ABCDEF";
const LOBBY_CODE_LEN: usize = 4;

/// Peer id: signed 32-bit, unique among connected peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(i32);

impl PeerId {
    /// Uniform over the whole `i32` range. Uniqueness is the registry's job.
    pub fn random() -> Self {
        Self(rand::rng().random())
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl From<i32> for PeerId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl FromStr for PeerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lobby code: 4 upper-case hex characters in a fixed array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LobbyCode([u8; LOBBY_CODE_LEN]);

impl LobbyCode {
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let mut bytes = [0u8; LOBBY_CODE_LEN];
        for byte in &mut bytes {
            *byte = LOBBY_CODE_CHARS[rng.random_range(0..LOBBY_CODE_CHARS.len())];
        }
        Self(bytes)
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("")
    }
}

impl fmt::Display for LobbyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codes typed by users are matched case-insensitively. Anything that is
/// not exactly a full code is rejected rather than shortened.
impl FromStr for LobbyCode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let typed = s.trim().as_bytes();
        if typed.len() != LOBBY_CODE_LEN || !typed.iter().all(u8::is_ascii_hexdigit) {
            return Err(ParseError::InvalidLobbyCode(s.to_string()));
        }
        let mut bytes = [0u8; LOBBY_CODE_LEN];
        for (byte, typed) in bytes.iter_mut().zip(typed) {
            *byte = typed.to_ascii_uppercase();
        }
        Ok(Self(bytes))
    }
}
