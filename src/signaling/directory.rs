use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use super::lobby::Lobby;
use super::peer::Peer;
use super::types::{LobbyCode, SignalingError};

/// Process-wide map from lobby code to lobby.
#[derive(Debug, Clone)]
pub struct LobbyDirectory {
    lobbies: Arc<DashMap<LobbyCode, Arc<Lobby>>>,
    max_lobbies: usize,
    seal_grace: Duration,
}

impl LobbyDirectory {
    pub fn new(max_lobbies: usize, seal_grace: Duration) -> Self {
        Self {
            lobbies: Arc::new(DashMap::new()),
            max_lobbies,
            seal_grace,
        }
    }

    /// Create a lobby hosted by `host` under a fresh code.
    ///
    /// The capacity check is read-then-act, so a burst of concurrent
    /// creates may briefly overshoot `max_lobbies`.
    pub fn create(&self, host: &Peer) -> Result<Arc<Lobby>, SignalingError> {
        let open = self.lobbies.len();
        if open >= self.max_lobbies {
            return Err(SignalingError::TooManyLobbies(open));
        }
        if host.lobby().is_some() {
            return Err(SignalingError::AlreadyInLobby(host.id()));
        }

        loop {
            let code = LobbyCode::generate();
            match self.lobbies.entry(code) {
                Entry::Occupied(_) => debug!("Lobby code {} already taken, drawing again", code),
                Entry::Vacant(slot) => {
                    let lobby = Arc::new(Lobby::new(code, host.id(), self.seal_grace));
                    slot.insert(Arc::clone(&lobby));
                    info!("Peer {} created lobby {}", host, code);
                    return Ok(lobby);
                }
            }
        }
    }

    pub fn get(&self, code: LobbyCode) -> Option<Arc<Lobby>> {
        self.lobbies.get(&code).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, code: LobbyCode) -> Option<Arc<Lobby>> {
        let removed = self.lobbies.remove(&code).map(|(_, lobby)| lobby);
        if removed.is_some() {
            info!("Deleted lobby {}, {} still open", code, self.lobbies.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lobbies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobbies.is_empty()
    }
}
