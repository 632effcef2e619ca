use std::ops::Deref;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info};

use super::peer::{Peer, PeerSender};
use super::timer;
use super::types::{HOST_ID, PeerId, SignalingError};

const JOIN_TIMEOUT_REASON: &str = "Have not joined any lobby yet";

/// Process-wide set of connected peers, keyed by id.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    peers: Arc<DashMap<PeerId, Arc<Peer>>>,
    join_timeout: Duration,
}

impl PeerRegistry {
    pub fn new(join_timeout: Duration) -> Self {
        Self {
            peers: Arc::new(DashMap::new()),
            join_timeout,
        }
    }

    /// Register a new peer under a fresh random id.
    ///
    /// Ids are drawn uniformly from the `i32` range (minus [`HOST_ID`]) and
    /// inserted only into a vacant slot, so concurrent creates can never
    /// share an id. With `n` live peers a draw collides with probability
    /// about `n / 2^32`; a collision just means another draw.
    ///
    /// The peer is closed with a protocol error if it is still active and
    /// outside any lobby once the join timeout elapses.
    pub fn create(&self, sender: PeerSender) -> Result<PeerRegistration, SignalingError> {
        if sender.is_closed() {
            return Err(SignalingError::InvalidPeer);
        }

        let peer = loop {
            let id = PeerId::random();
            if id == HOST_ID {
                continue;
            }
            match self.peers.entry(id) {
                Entry::Occupied(_) => debug!("Peer id {} already taken, drawing again", id),
                Entry::Vacant(slot) => {
                    let peer = Arc::new(Peer::new(id, sender));
                    slot.insert(Arc::clone(&peer));
                    break peer;
                }
            }
        };

        self.schedule_join_deadline(Arc::downgrade(&peer));

        Ok(PeerRegistration {
            peer,
            peers: Arc::clone(&self.peers),
        })
    }

    fn schedule_join_deadline(&self, watched: Weak<Peer>) {
        timer::schedule(self.join_timeout, move |_| async move {
            let Some(peer) = watched.upgrade() else {
                return;
            };
            if !peer.is_active() || peer.lobby().is_some() {
                return;
            }
            info!("Peer {} joined no lobby in time", peer);
            if let Err(e) = peer.sender().close(CloseCode::Protocol, JOIN_TIMEOUT_REASON).await {
                debug!("Join deadline close for {} failed: {}", peer, e);
            }
        });
    }

    /// Remove a peer, freeing its id for reuse.
    pub fn release(&self, id: PeerId) {
        self.peers.remove(&id);
    }

    /// Number of live peers. Not synchronised with concurrent creates.
    pub fn count(&self) -> usize {
        self.peers.len()
    }

    #[cfg(test)]
    fn contains(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }
}

/// A registered peer. Dropping it marks the peer inactive and releases its
/// id from the registry.
#[derive(Debug)]
pub struct PeerRegistration {
    peer: Arc<Peer>,
    peers: Arc<DashMap<PeerId, Arc<Peer>>>,
}

impl PeerRegistration {
    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }
}

impl Deref for PeerRegistration {
    type Target = Arc<Peer>;

    fn deref(&self) -> &Self::Target {
        &self.peer
    }
}

impl Drop for PeerRegistration {
    fn drop(&mut self) {
        self.peer.deactivate();
        self.peers
            .remove_if(&self.peer.id(), |_, held| Arc::ptr_eq(held, &self.peer));
    }
}
