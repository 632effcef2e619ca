//! WebSocket lobby relay for P2P signaling

mod directory;
mod handler;
mod lobby;
mod messages;
mod peer;
mod registry;
mod server;
mod timer;
mod types;

pub use directory::LobbyDirectory;
pub use lobby::Lobby;
pub use messages::{ClientMessage, ParseError, RelayKind, ServerMessage};
pub use peer::{Outbound, Peer, PeerSender};
pub use registry::{PeerRegistration, PeerRegistry};
pub use server::{SignalingServer, SignalingState};
pub use types::{HOST_ID, LobbyCode, PeerId, SignalingError};
