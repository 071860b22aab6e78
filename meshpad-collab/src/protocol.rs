//! Binary protocol for peer-to-peer document synchronization.
//!
//! Two layers, both bincode-encoded:
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ RelayFrame   (transport: join, route, notify) │
//! │  └─ payload: CollabMessage                    │
//! │       ├─ PresenceAnnounce                     │
//! │       ├─ Edit { path, delta }                 │
//! │       └─ Seed(full text)                      │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! `CollabMessage` is what peers exchange. `RelayFrame` is only spoken
//! between a [`WsTransport`](crate::relay::WsTransport) and the relay server.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::delta::EditDelta;

/// Transport-assigned peer identity.
pub type PeerId = Uuid;

/// Message types for the collaboration protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// A newly joined peer asking to be seeded
    PresenceAnnounce = 1,
    /// Incremental text edit
    Edit = 2,
    /// Full document text for a pending peer
    Seed = 3,
}

/// An edit tagged with the project-relative path of the document it targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditMessage {
    pub path: String,
    pub delta: EditDelta,
}

/// Top-level message exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollabMessage {
    PresenceAnnounce,
    Edit(EditMessage),
    Seed(String),
}

impl CollabMessage {
    /// Create a presence announcement.
    pub fn presence() -> Self {
        Self::PresenceAnnounce
    }

    /// Create an edit message.
    pub fn edit(path: impl Into<String>, delta: EditDelta) -> Self {
        Self::Edit(EditMessage {
            path: path.into(),
            delta,
        })
    }

    /// Create a full-document seed.
    pub fn seed(text: impl Into<String>) -> Self {
        Self::Seed(text.into())
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::PresenceAnnounce => MessageType::PresenceAnnounce,
            Self::Edit(_) => MessageType::Edit,
            Self::Seed(_) => MessageType::Seed,
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }
}

/// Frames spoken between a relay client and the relay server.
///
/// The relay never looks inside `payload`; it only routes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayFrame {
    /// Client → server: join (or create) a room. Must be the first frame.
    Join { room: String },
    /// Server → client: join accepted, with the peers already in the room.
    Welcome { peer_id: PeerId, peers: Vec<PeerId> },
    /// Server → client: the room is at capacity.
    RoomFull,
    /// Server → client: another peer joined the room.
    PeerConnected(PeerId),
    /// Server → client: another peer left the room.
    PeerDisconnected(PeerId),
    /// Client → server: route `payload` to one peer, or to everyone else.
    Send { to: Option<PeerId>, payload: Vec<u8> },
    /// Server → client: a payload routed from `from`.
    Deliver { from: PeerId, payload: Vec<u8> },
}

impl RelayFrame {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(frame)
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
    RoomFull,
    UnexpectedFrame(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::RoomFull => write!(f, "Room is full"),
            Self::UnexpectedFrame(frame) => write!(f, "Unexpected frame: {frame}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
