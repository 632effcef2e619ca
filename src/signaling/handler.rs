use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{Bytes, Message, Utf8Bytes};
use tracing::{debug, info, warn};

use super::lobby::Lobby;
use super::messages::{ClientMessage, RelayKind, ServerMessage};
use super::peer::{Outbound, Peer, PeerSender};
use super::server::SignalingState;
use super::types::{HOST_ID, LobbyCode, PeerId, SignalingError};

const TOO_MANY_PEERS_REASON: &str = "Too many peers";

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

pub(crate) async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: SignalingState,
) -> Result<(), SignalingError> {
    let config = state.config();
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);
    let ws_stream = tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    if state.peers().count() >= config.max_peers {
        warn!("Peer limit ({}) reached, rejecting {}", config.max_peers, addr);
        ws_tx
            .send(close_frame(CloseCode::Away, TOO_MANY_PEERS_REASON))
            .await?;
        return Ok(());
    }

    let (sender, outbound_rx) = PeerSender::channel(config.outbound_queue);
    let peer = state.peers().create(sender)?;
    info!("Peer {} connected from {}", peer.id(), addr);

    let mut send_task = tokio::spawn(write_outbound(ws_tx, outbound_rx));

    let start = tokio::time::Instant::now() + config.ping_interval;
    let mut ping_interval = tokio::time::interval_at(start, config.ping_interval);
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    loop {
        let pong_timeout = async move {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = &mut send_task => {
                debug!("Writer for peer {} stopped", peer.id());
                break;
            }

            _ = ping_interval.tick() => {
                if pong_deadline.is_some() {
                    continue;
                }
                if peer.sender().send(Outbound::Ping).await.is_err() {
                    break;
                }
                pong_deadline = Some(tokio::time::Instant::now() + config.pong_timeout);
                debug!("Ping sent to peer {}", peer.id());
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting peer {}", peer.id());
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error from peer {}: {}", peer.id(), e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => handle_text_message(&state, &peer, text.as_str()).await,
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => handle_text_message(&state, &peer, text).await,
                        Err(_) => warn!("Non UTF-8 binary message from peer {}", peer.id()),
                    },
                    Message::Pong(_) => {
                        pong_deadline = None;
                        debug!("Pong received from peer {}", peer.id());
                    }
                    Message::Close(_) => {
                        info!("Close received from peer {}", peer.id());
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    depart(&state, &peer).await;
    send_task.abort();
    info!("Peer {} disconnected", peer.id());

    Ok(())
}

/// Drain a peer's outbound queue into its socket. Stops after a close frame.
async fn write_outbound(mut ws_tx: WsSink, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(msg) = rx.recv().await {
        let (frame, last) = match msg {
            Outbound::Text(text) => (Message::Text(text), false),
            Outbound::Ping => (Message::Ping(Bytes::new()), false),
            Outbound::Close { code, reason } => (close_frame(code, reason), true),
        };
        if let Err(e) = ws_tx.send(frame).await {
            debug!("Socket write failed: {}", e);
            break;
        }
        if last {
            break;
        }
    }
}

fn close_frame(code: CloseCode, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    }))
}

/// Parse and act on one client message. Problems are logged and the
/// message dropped; the client is never told.
pub(crate) async fn handle_text_message(state: &SignalingState, peer: &Arc<Peer>, text: &str) {
    if let Err(e) = dispatch(state, peer, text).await {
        warn!("Ignoring message from peer {}: {}", peer, e);
    }
}

async fn dispatch(
    state: &SignalingState,
    peer: &Arc<Peer>,
    text: &str,
) -> Result<(), SignalingError> {
    match ClientMessage::parse(text)? {
        ClientMessage::Join { name, lobby } => join_lobby(state, peer, name, lobby).await,
        ClientMessage::Seal => current_lobby(state, peer)?.seal(peer).await,
        ClientMessage::Relay {
            kind,
            destination,
            payload,
        } => {
            let lobby = current_lobby(state, peer)?;
            relay(&lobby, peer, kind, destination, payload).await
        }
    }
}

fn current_lobby(state: &SignalingState, peer: &Peer) -> Result<Arc<Lobby>, SignalingError> {
    let code = peer.lobby().ok_or(SignalingError::NotInLobby(peer.id()))?;
    state
        .lobbies()
        .get(code)
        .ok_or(SignalingError::LobbyNotFound(code))
}

async fn join_lobby(
    state: &SignalingState,
    peer: &Arc<Peer>,
    name: &str,
    requested: Option<&str>,
) -> Result<(), SignalingError> {
    if peer.lobby().is_some() {
        return Err(SignalingError::AlreadyInLobby(peer.id()));
    }
    peer.set_name(name);

    let lobby = match requested {
        None => state.lobbies().create(peer)?,
        Some(code) => {
            let code: LobbyCode = code.parse()?;
            state
                .lobbies()
                .get(code)
                .ok_or(SignalingError::LobbyNotFound(code))?
        }
    };

    // Recorded before joining so the join deadline sees a peer mid-join.
    peer.set_lobby(lobby.code())?;

    let members = lobby.member_count().await;
    info!(
        "Peer {} is joining lobby {} with {} peers",
        peer,
        lobby.code(),
        members
    );
    if let Err(e) = lobby.join(peer).await {
        peer.clear_lobby();
        if requested.is_none() {
            state.lobbies().remove(lobby.code());
        }
        return Err(e);
    }

    peer.sender()
        .send_message(ServerMessage::Joined(lobby.code()))
        .await
}

async fn relay(
    lobby: &Lobby,
    sender: &Peer,
    kind: RelayKind,
    destination: PeerId,
    payload: &str,
) -> Result<(), SignalingError> {
    if lobby.find_member(sender.id()).await.is_none() {
        return Err(SignalingError::NotInLobby(sender.id()));
    }
    let target = if destination == HOST_ID {
        lobby.host_id()
    } else {
        destination
    };
    let recipient = lobby
        .find_member(target)
        .await
        .ok_or(SignalingError::UnknownDestination(destination))?;

    recipient
        .sender()
        .send_message(ServerMessage::Relay {
            kind,
            from: lobby.external_id(sender),
            payload,
        })
        .await
}

/// Leave the peer's lobby, dropping the lobby from the directory when the
/// host is the one leaving.
pub(crate) async fn depart(state: &SignalingState, peer: &Peer) {
    let Some(code) = peer.lobby() else {
        return;
    };
    let Some(lobby) = state.lobbies().get(code) else {
        return;
    };
    if lobby.leave(peer).await {
        state.lobbies().remove(code);
    }
}
