use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info};

use super::messages::ServerMessage;
use super::peer::Peer;
use super::timer::{self, TimerHandle};
use super::types::{HOST_ID, LobbyCode, PeerId, SignalingError};

const HOST_LEFT_REASON: &str = "Room host has disconnected";
const SEAL_COMPLETE_REASON: &str = "Seal complete";

#[derive(Debug, Default)]
struct LobbyState {
    /// Join order
    members: Vec<Arc<Peer>>,
    sealed: bool,
    /// Set once the host leaves
    closed: bool,
    /// Pending seal grace timer
    close_timer: Option<TimerHandle>,
}

/// A lobby of peers relaying signaling messages, owned by its host.
///
/// Every operation runs under one async mutex. Fan-out to members happens
/// concurrently inside the critical section, so the lock is held for about
/// as long as the slowest single send.
#[derive(Debug)]
pub struct Lobby {
    code: LobbyCode,
    host_id: PeerId,
    seal_grace: Duration,
    state: Mutex<LobbyState>,
}

impl Lobby {
    pub fn new(code: LobbyCode, host_id: PeerId, seal_grace: Duration) -> Self {
        Self {
            code,
            host_id,
            seal_grace,
            state: Mutex::new(LobbyState::default()),
        }
    }

    pub fn code(&self) -> LobbyCode {
        self.code
    }

    pub fn host_id(&self) -> PeerId {
        self.host_id
    }

    /// The id other members know `peer` by: [`HOST_ID`] for the host,
    /// the real id for everyone else.
    pub fn external_id(&self, peer: &Peer) -> PeerId {
        if peer.id() == self.host_id {
            HOST_ID
        } else {
            peer.id()
        }
    }

    /// Add `peer` and introduce it to the current members.
    pub async fn join(&self, peer: &Arc<Peer>) -> Result<(), SignalingError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(SignalingError::LobbyClosed(self.code));
        }
        if state.sealed {
            return Err(SignalingError::LobbySealed(self.code));
        }
        if state.members.iter().any(|m| m.id() == peer.id()) {
            return Err(SignalingError::AlreadyMember(peer.id()));
        }

        let joiner_id = self.external_id(peer);
        let joiner_name = peer.name();
        deliver(peer, ServerMessage::Identity(joiner_id)).await;

        let visible: Vec<(&Arc<Peer>, PeerId, String)> = state
            .members
            .iter()
            .map(|member| (member, self.external_id(member), member.name()))
            .collect();

        let mut sends = Vec::with_capacity(visible.len() * 2);
        for (member, member_id, member_name) in &visible {
            sends.push(deliver(
                member,
                ServerMessage::PeerVisible {
                    name: &joiner_name,
                    id: joiner_id,
                },
            ));
            sends.push(deliver(
                peer,
                ServerMessage::PeerVisible {
                    name: member_name,
                    id: *member_id,
                },
            ));
        }
        join_all(sends).await;

        state.members.push(Arc::clone(peer));
        Ok(())
    }

    /// Remove `peer`. Returns true when the host left, meaning the lobby is
    /// torn down and should be dropped from the directory.
    pub async fn leave(&self, peer: &Peer) -> bool {
        let mut state = self.state.lock().await;
        let Some(index) = state.members.iter().position(|m| m.id() == peer.id()) else {
            return false;
        };

        let departing = self.external_id(peer);
        let is_host = departing == HOST_ID;
        let others = state.members.iter().filter(|m| m.id() != peer.id());

        if is_host {
            join_all(others.map(|m| close(m, HOST_LEFT_REASON))).await;
        } else {
            join_all(others.map(|m| deliver(m, ServerMessage::PeerDeparted(departing)))).await;
        }

        state.members.remove(index);

        if is_host {
            state.closed = true;
            if let Some(timer) = state.close_timer.take() {
                timer.cancel();
            }
            info!("Host left lobby {}, tearing down", self.code);
        }

        is_host
    }

    /// Close the lobby to new joins and start the grace period after which
    /// all remaining members are disconnected.
    pub async fn seal(self: &Arc<Self>, peer: &Peer) -> Result<(), SignalingError> {
        if peer.id() != self.host_id {
            return Err(SignalingError::NotHost(peer.id()));
        }

        let mut state = self.state.lock().await;
        if state.closed {
            return Err(SignalingError::LobbyClosed(self.code));
        }
        if state.sealed {
            return Err(SignalingError::AlreadySealed(self.code));
        }
        state.sealed = true;

        join_all(state.members.iter().map(|m| deliver(m, ServerMessage::Sealed))).await;

        let lobby = Arc::downgrade(self);
        state.close_timer = Some(timer::schedule(self.seal_grace, move |handle| async move {
            if let Some(lobby) = lobby.upgrade() {
                lobby.close_after_seal(handle).await;
            }
        }));

        info!("Lobby {} sealed with {} members", self.code, state.members.len());
        Ok(())
    }

    async fn close_after_seal(&self, handle: TimerHandle) {
        let mut state = self.state.lock().await;
        if handle.is_cancelled() {
            return;
        }

        info!(
            "Seal grace over for lobby {}, closing {} members",
            self.code,
            state.members.len()
        );
        join_all(state.members.iter().map(|m| close(m, SEAL_COMPLETE_REASON))).await;
        state.close_timer = None;
    }

    /// Visit every current member under the lobby lock.
    pub async fn iterate_peers<F>(&self, mut visit: F)
    where
        F: FnMut(&Arc<Peer>),
    {
        let state = self.state.lock().await;
        for member in &state.members {
            visit(member);
        }
    }

    /// Find a member by its real id.
    pub async fn find_member(&self, id: PeerId) -> Option<Arc<Peer>> {
        let mut found = None;
        self.iterate_peers(|member| {
            if member.id() == id {
                found = Some(Arc::clone(member));
            }
        })
        .await;
        found
    }

    pub async fn member_count(&self) -> usize {
        let mut count = 0;
        self.iterate_peers(|_| count += 1).await;
        count
    }

    pub async fn is_sealed(&self) -> bool {
        self.state.lock().await.sealed
    }
}

/// Best-effort send: an unreachable peer is logged and skipped.
async fn deliver(peer: &Peer, msg: ServerMessage<'_>) {
    if let Err(e) = peer.sender().send_message(msg).await {
        debug!("Dropped message to peer {}: {}", peer, e);
    }
}

/// Best-effort close: a peer that is already gone counts as closed.
async fn close(peer: &Peer, reason: &'static str) {
    if let Err(e) = peer.sender().close(CloseCode::Normal, reason).await {
        debug!("Peer {} already closed: {}", peer, e);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tokio::sync::mpsc;

    use super::*;
    use crate::signaling::peer::{Outbound, PeerSender};

    fn peer(id: i32, name: &str) -> (Arc<Peer>, mpsc::Receiver<Outbound>) {
        let (sender, rx) = PeerSender::channel(32);
        let peer = Arc::new(Peer::new(PeerId::from(id), sender));
        peer.set_name(name);
        (peer, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn texts(rx: &mut mpsc::Receiver<Outbound>) -> Vec<String> {
        drain(rx)
            .into_iter()
            .filter_map(|msg| match msg {
                Outbound::Text(text) => Some(text.as_str().to_string()),
                _ => None,
            })
            .collect()
    }

    fn closed_with(reason: &'static str) -> Outbound {
        Outbound::Close {
            code: CloseCode::Normal,
            reason,
        }
    }

    fn lobby(host: &Peer) -> Arc<Lobby> {
        Arc::new(Lobby::new(
            "AB12".parse::<LobbyCode>().unwrap(),
            host.id(),
            Duration::from_secs(10),
        ))
    }

    #[test]
    fn host_is_shown_as_host_id() {
        let (host, _) = peer(100, "host");
        let (guest, _) = peer(200, "guest");
        let lobby = lobby(&host);
        assert_eq!(lobby.external_id(&host), HOST_ID);
        assert_eq!(lobby.external_id(&guest), PeerId::from(200));
    }

    #[tokio::test]
    async fn join_introduces_everyone() {
        let (b, mut b_rx) = peer(100, "bea");
        let (c, mut c_rx) = peer(200, "cid");
        let (a, mut a_rx) = peer(300, "ada");
        let lobby = lobby(&b);

        lobby.join(&b).await.unwrap();
        lobby.join(&c).await.unwrap();
        drain(&mut b_rx);
        drain(&mut c_rx);

        lobby.join(&a).await.unwrap();

        let a_texts = texts(&mut a_rx);
        assert_eq!(a_texts.len(), 3);
        assert_eq!(a_texts[0], "I: 300\n");
        let visible: HashSet<&str> = a_texts[1..].iter().map(String::as_str).collect();
        assert_eq!(visible, HashSet::from(["N: bea|1\n", "N: cid|200\n"]));

        assert_eq!(texts(&mut b_rx), vec!["N: ada|300\n"]);
        assert_eq!(texts(&mut c_rx), vec!["N: ada|300\n"]);
        assert_eq!(lobby.member_count().await, 3);
    }

    #[tokio::test]
    async fn host_gets_host_identity() {
        let (host, mut rx) = peer(100, "host");
        let lobby = lobby(&host);
        lobby.join(&host).await.unwrap();
        assert_eq!(texts(&mut rx), vec!["I: 1\n"]);
    }

    #[tokio::test]
    async fn join_twice_is_rejected() {
        let (host, _rx) = peer(100, "host");
        let lobby = lobby(&host);
        lobby.join(&host).await.unwrap();
        let err = lobby.join(&host).await.unwrap_err();
        assert!(matches!(err, SignalingError::AlreadyMember(_)));
        assert_eq!(lobby.member_count().await, 1);
    }

    #[tokio::test]
    async fn join_survives_unreachable_member() {
        let (host, host_rx) = peer(100, "host");
        let (guest, mut guest_rx) = peer(200, "guest");
        let lobby = lobby(&host);
        lobby.join(&host).await.unwrap();
        drop(host_rx);

        lobby.join(&guest).await.unwrap();
        assert_eq!(texts(&mut guest_rx), vec!["I: 200\n", "N: host|1\n"]);
    }

    #[tokio::test]
    async fn non_host_leave_broadcasts_departure() {
        let (host, mut host_rx) = peer(100, "host");
        let (b, mut b_rx) = peer(200, "b");
        let (c, mut c_rx) = peer(300, "c");
        let lobby = lobby(&host);
        for p in [&host, &b, &c] {
            lobby.join(p).await.unwrap();
        }
        drain(&mut host_rx);
        drain(&mut b_rx);
        drain(&mut c_rx);

        assert!(!lobby.leave(&c).await);

        assert_eq!(texts(&mut host_rx), vec!["D: 300\n"]);
        assert_eq!(texts(&mut b_rx), vec!["D: 300\n"]);
        assert!(drain(&mut c_rx).is_empty());
        assert!(lobby.find_member(c.id()).await.is_none());
        assert_eq!(lobby.member_count().await, 2);
    }

    #[tokio::test]
    async fn leave_is_idempotent() {
        let (host, _host_rx) = peer(100, "host");
        let (b, _b_rx) = peer(200, "b");
        let lobby = lobby(&host);
        lobby.join(&host).await.unwrap();
        lobby.join(&b).await.unwrap();

        assert!(!lobby.leave(&b).await);
        assert!(!lobby.leave(&b).await);
    }

    #[tokio::test]
    async fn host_leave_closes_everyone_else() {
        let (host, mut host_rx) = peer(100, "host");
        let (b, mut b_rx) = peer(200, "b");
        let (c, c_rx) = peer(300, "c");
        let lobby = lobby(&host);
        for p in [&host, &b, &c] {
            lobby.join(p).await.unwrap();
        }
        drain(&mut host_rx);
        drain(&mut b_rx);
        drop(c_rx);

        assert!(lobby.leave(&host).await);

        assert_eq!(drain(&mut b_rx), vec![closed_with(HOST_LEFT_REASON)]);
        assert!(drain(&mut host_rx).is_empty());

        let (late, _late_rx) = peer(400, "late");
        let err = lobby.join(&late).await.unwrap_err();
        assert!(matches!(err, SignalingError::LobbyClosed(_)));
    }

    #[tokio::test]
    async fn seal_by_guest_is_refused() {
        let (host, _host_rx) = peer(100, "host");
        let (b, _b_rx) = peer(200, "b");
        let lobby = lobby(&host);
        lobby.join(&host).await.unwrap();
        lobby.join(&b).await.unwrap();

        let err = lobby.seal(&b).await.unwrap_err();
        assert!(matches!(err, SignalingError::NotHost(_)));
        assert!(!lobby.is_sealed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn seal_notifies_then_closes_after_grace() {
        let (host, mut host_rx) = peer(100, "host");
        let (b, mut b_rx) = peer(200, "b");
        let lobby = lobby(&host);
        lobby.join(&host).await.unwrap();
        lobby.join(&b).await.unwrap();
        drain(&mut host_rx);
        drain(&mut b_rx);

        lobby.seal(&host).await.unwrap();
        assert!(lobby.is_sealed().await);
        assert_eq!(texts(&mut host_rx), vec!["S: \n"]);
        assert_eq!(texts(&mut b_rx), vec!["S: \n"]);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(drain(&mut b_rx).is_empty());

        assert_eq!(b_rx.recv().await, Some(closed_with(SEAL_COMPLETE_REASON)));
        assert_eq!(host_rx.recv().await, Some(closed_with(SEAL_COMPLETE_REASON)));
    }

    #[tokio::test(start_paused = true)]
    async fn host_leaving_cancels_seal_close() {
        let (host, _host_rx) = peer(100, "host");
        let (b, mut b_rx) = peer(200, "b");
        let lobby = lobby(&host);
        lobby.join(&host).await.unwrap();
        lobby.join(&b).await.unwrap();
        lobby.seal(&host).await.unwrap();
        drain(&mut b_rx);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(lobby.leave(&host).await);
        assert_eq!(drain(&mut b_rx), vec![closed_with(HOST_LEFT_REASON)]);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(drain(&mut b_rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_seal_is_rejected() {
        let (host, _host_rx) = peer(100, "host");
        let lobby = lobby(&host);
        lobby.join(&host).await.unwrap();
        lobby.seal(&host).await.unwrap();

        let err = lobby.seal(&host).await.unwrap_err();
        assert!(matches!(err, SignalingError::AlreadySealed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn sealed_lobby_refuses_joins() {
        let (host, _host_rx) = peer(100, "host");
        let (late, mut late_rx) = peer(200, "late");
        let lobby = lobby(&host);
        lobby.join(&host).await.unwrap();
        lobby.seal(&host).await.unwrap();

        let err = lobby.join(&late).await.unwrap_err();
        assert!(matches!(err, SignalingError::LobbySealed(_)));
        assert!(drain(&mut late_rx).is_empty());
    }

    #[tokio::test]
    async fn find_member_by_real_id() {
        let (host, _host_rx) = peer(100, "host");
        let (b, _b_rx) = peer(200, "b");
        let lobby = lobby(&host);
        lobby.join(&host).await.unwrap();
        lobby.join(&b).await.unwrap();

        let found = lobby.find_member(PeerId::from(100)).await.unwrap();
        assert!(Arc::ptr_eq(&found, &host));
        assert!(lobby.find_member(PeerId::from(999)).await.is_none());
    }
}
