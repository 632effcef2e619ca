use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::messages::ServerMessage;
use super::types::{LobbyCode, PeerId, SignalingError};

/// One item on a connection's outbound queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(Utf8Bytes),
    Ping,
    /// Send a close frame and stop writing
    Close { code: CloseCode, reason: &'static str },
}

/// Sending half of a connection's outbound queue.
///
/// The queue is bounded, so a send suspends while a slow peer's writer
/// catches up.
#[derive(Debug, Clone)]
pub struct PeerSender {
    tx: mpsc::Sender<Outbound>,
}

impl PeerSender {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn send(&self, msg: Outbound) -> Result<(), SignalingError> {
        self.tx.send(msg).await.map_err(|_| SignalingError::PeerGone)
    }

    pub async fn send_message(&self, msg: ServerMessage<'_>) -> Result<(), SignalingError> {
        self.send(Outbound::Text(Utf8Bytes::from(msg.to_string())))
            .await
    }

    pub async fn close(&self, code: CloseCode, reason: &'static str) -> Result<(), SignalingError> {
        self.send(Outbound::Close { code, reason }).await
    }
}

/// A connected peer
#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    sender: PeerSender,
    lobby: Mutex<Option<LobbyCode>>,
    name: Mutex<Option<String>>,
    active: AtomicBool,
}

impl Peer {
    pub(crate) fn new(id: PeerId, sender: PeerSender) -> Self {
        Self {
            id,
            sender,
            lobby: Mutex::new(None),
            name: Mutex::new(None),
            active: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn sender(&self) -> &PeerSender {
        &self.sender
    }

    /// The lobby this peer joined or is joining, if any. A peer joins at
    /// most one lobby for the lifetime of its connection.
    pub fn lobby(&self) -> Option<LobbyCode> {
        *self.lobby.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_lobby(&self, code: LobbyCode) -> Result<(), SignalingError> {
        let mut lobby = self.lobby.lock().unwrap_or_else(PoisonError::into_inner);
        if lobby.is_some() {
            return Err(SignalingError::AlreadyInLobby(self.id));
        }
        *lobby = Some(code);
        Ok(())
    }

    /// Forget a lobby whose join was refused.
    pub(crate) fn clear_lobby(&self) {
        *self.lobby.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn name(&self) -> String {
        self.name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default()
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.lock().unwrap_or_else(PoisonError::into_inner) = Some(name.to_string());
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_message_appends_line_break() {
        let (sender, mut rx) = PeerSender::channel(4);
        sender
            .send_message(ServerMessage::Identity(PeerId::from(7)))
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(Outbound::Text("I: 7\n".into())));
    }

    #[tokio::test]
    async fn send_to_dropped_receiver_is_peer_gone() {
        let (sender, rx) = PeerSender::channel(1);
        drop(rx);
        assert!(sender.is_closed());
        let err = sender.close(CloseCode::Normal, "bye").await.unwrap_err();
        assert!(matches!(err, SignalingError::PeerGone));
    }

    #[test]
    fn lobby_is_set_once() {
        let (sender, _rx) = PeerSender::channel(1);
        let peer = Peer::new(PeerId::from(5), sender);
        assert_eq!(peer.lobby(), None);
        peer.set_lobby("AAAA".parse::<LobbyCode>().unwrap()).unwrap();
        assert!(matches!(
            peer.set_lobby("BBBB".parse::<LobbyCode>().unwrap()),
            Err(SignalingError::AlreadyInLobby(_))
        ));
        assert_eq!(peer.lobby(), Some("AAAA".parse::<LobbyCode>().unwrap()));
    }

    #[test]
    fn cleared_lobby_can_be_set_again() {
        let (sender, _rx) = PeerSender::channel(1);
        let peer = Peer::new(PeerId::from(5), sender);
        peer.set_lobby("AAAA".parse::<LobbyCode>().unwrap()).unwrap();
        peer.clear_lobby();
        assert_eq!(peer.lobby(), None);
        peer.set_lobby("BBBB".parse::<LobbyCode>().unwrap()).unwrap();
        assert_eq!(peer.lobby(), Some("BBBB".parse::<LobbyCode>().unwrap()));
    }

    #[test]
    fn name_defaults_to_empty() {
        let (sender, _rx) = PeerSender::channel(1);
        let peer = Peer::new(PeerId::from(5), sender);
        assert_eq!(peer.name(), "");
        peer.set_name("dave");
        assert_eq!(peer.name(), "dave");
    }
}
