//! Line-oriented text protocol.
//!
//! The first line of a message is the command line, `"<LETTER>: <rest>"`.
//! Anything after the first `\n` is payload and is only meaningful for
//! relay commands, where it is forwarded untouched.

use std::fmt;

use thiserror::Error;

use super::types::{LobbyCode, PeerId};

/// Length of the `"X: "` prefix every command line starts with.
const PREFIX_LEN: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("no line break in message")]
    MissingLineBreak,

    #[error("command line too short: {0:?}")]
    CommandTooShort(String),

    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    #[error("invalid destination: {0:?}")]
    InvalidDestination(String),

    #[error("invalid lobby code: {0:?}")]
    InvalidLobbyCode(String),
}

/// Signaling payload kinds the server relays without looking inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Offer,
    Answer,
    Candidate,
}

impl RelayKind {
    pub fn letter(self) -> char {
        match self {
            RelayKind::Offer => 'O',
            RelayKind::Answer => 'A',
            RelayKind::Candidate => 'C',
        }
    }

    fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'O' => Some(RelayKind::Offer),
            'A' => Some(RelayKind::Answer),
            'C' => Some(RelayKind::Candidate),
            _ => None,
        }
    }
}

/// Messages sent from client to server
#[derive(Debug, PartialEq, Eq)]
pub enum ClientMessage<'a> {
    /// Join a lobby by code, or create one when `lobby` is `None`
    Join {
        name: &'a str,
        lobby: Option<&'a str>,
    },

    /// Host closes the lobby to new joins
    Seal,

    /// Forward `payload` to `destination` inside the sender's lobby
    Relay {
        kind: RelayKind,
        destination: PeerId,
        /// Everything from the first `\n` on, line break included
        payload: &'a str,
    },
}

impl<'a> ClientMessage<'a> {
    pub fn parse(text: &'a str) -> Result<Self, ParseError> {
        let split = text.find('\n').ok_or(ParseError::MissingLineBreak)?;
        let (command, payload) = text.split_at(split);

        if command.len() < PREFIX_LEN {
            return Err(ParseError::CommandTooShort(command.to_string()));
        }

        let mut chars = command.chars();
        let letter = chars.next().unwrap_or_default();
        if !chars.as_str().starts_with(": ") {
            return Err(ParseError::UnknownCommand(command.to_string()));
        }
        let rest = &command[letter.len_utf8() + 2..];

        match letter {
            'J' => {
                let (name, lobby) = match rest.rfind('|') {
                    Some(bar) => (&rest[..bar], &rest[bar + 1..]),
                    None => (rest, ""),
                };
                let lobby = lobby.trim();
                Ok(ClientMessage::Join {
                    name: name.trim(),
                    lobby: (!lobby.is_empty()).then_some(lobby),
                })
            }
            'S' => Ok(ClientMessage::Seal),
            other => {
                let kind = RelayKind::from_letter(other)
                    .ok_or_else(|| ParseError::UnknownCommand(command.to_string()))?;
                let destination = rest
                    .parse()
                    .map_err(|_| ParseError::InvalidDestination(rest.to_string()))?;
                Ok(ClientMessage::Relay {
                    kind,
                    destination,
                    payload,
                })
            }
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, PartialEq, Eq)]
pub enum ServerMessage<'a> {
    /// Your externally-visible id
    Identity(PeerId),

    /// A peer is now visible to you
    PeerVisible { name: &'a str, id: PeerId },

    /// A peer left the lobby
    PeerDeparted(PeerId),

    /// Join confirmation
    Joined(LobbyCode),

    /// The host sealed the lobby
    Sealed,

    /// Relayed signaling payload, `from` is the sender's visible id
    Relay {
        kind: RelayKind,
        from: PeerId,
        payload: &'a str,
    },
}

/// Every server message is terminated with a line break.
impl fmt::Display for ServerMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Identity(id) => writeln!(f, "I: {}", id),
            ServerMessage::PeerVisible { name, id } => writeln!(f, "N: {}|{}", name, id),
            ServerMessage::PeerDeparted(id) => writeln!(f, "D: {}", id),
            ServerMessage::Joined(code) => writeln!(f, "J: {}", code),
            ServerMessage::Sealed => writeln!(f, "S: "),
            ServerMessage::Relay {
                kind,
                from,
                payload,
            } => writeln!(f, "{}: {}{}", kind.letter(), from, payload),
        }
    }
}
