//! # meshpad-collab: peer-to-peer text document synchronization
//!
//! Keeps one open text document identical across every peer in a room.
//! No server holds the document: a joining peer announces itself and an
//! existing peer seeds it with the full text, after which edits flow
//! directly between peers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  Edit / Seed / Presence  ┌──────────────┐
//! │ Collaboration│ ◄──────────────────────► │ Collaboration│
//! │   (peer A)   │     Transport (mesh,     │   (peer B)   │
//! └──────┬───────┘      relay, ...)         └──────┬───────┘
//!        │ EditGuard                               │ EditGuard
//!        ▼                                         ▼
//! ┌──────────────┐                          ┌──────────────┐
//! │ TextDocument │                          │ TextDocument │
//! │ (editor buf) │                          │ (editor buf) │
//! └──────────────┘                          └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`session`]: room token from a shared link, or a fresh one
//! - [`protocol`]: bincode wire messages
//! - [`delta`]: positional edit operations
//! - [`document`]: the editor buffer interface
//! - [`guard`]: echo suppression for remote applies
//! - [`peers`]: peer lifecycle and the pending-seed registry
//! - [`transport`]: transport contract and an in-process mesh
//! - [`relay`]: WebSocket signalling relay and client transport
//! - [`engine`]: the synchronization engine
//!
//! ## Known limitation
//!
//! Edits carry no causal metadata. Two peers editing concurrently against the
//! same base text can diverge; divergent edits that no longer fit the local
//! buffer are rejected as [`CollabError::Desync`] and stay lost until the
//! peer re-announces and is seeded again.

pub mod delta;
pub mod document;
pub mod engine;
pub mod guard;
pub mod peers;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use delta::{EditDelta, Position};
pub use document::{MemoryDocument, TextDocument};
pub use engine::{CollabConfig, CollabError, CollabStats, Collaboration, Handled, IgnoreReason};
pub use guard::{EditGuard, GuardToken};
pub use peers::{PeerState, PeerTable, PendingPeers};
pub use protocol::{CollabMessage, EditMessage, MessageType, PeerId, ProtocolError, RelayFrame};
pub use relay::{RelayConfig, RelayServer, RelayStats, WsTransport};
pub use session::Session;
pub use transport::{LocalMesh, MeshTransport, Transport, TransportEvent};
