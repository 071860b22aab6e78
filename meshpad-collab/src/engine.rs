//! The replicated-document synchronization engine.
//!
//! ```text
//!   local edit ──► on_local_change ──(guard free)──► send_to_all(Edit)
//!
//!   TransportEvent ──► handle_event
//!        ├─ Joined            → announce presence
//!        ├─ PeerConnected     → track peer (Announced)
//!        ├─ PeerDisconnected  → forget peer, drop pending entry
//!        └─ Message
//!             ├─ PresenceAnnounce → mark pending → seed_peer (if attached)
//!             ├─ Edit             → apply_remote_edit (guarded)
//!             └─ Seed             → apply_seed (guarded)
//! ```
//!
//! Every handler is synchronous and runs to completion, so the guard only has
//! to suppress re-entrant work, never wait for it. There is no clock, version
//! or rebase: peers converge only if they start from the same seed and apply
//! each link's edits in delivery order. Edits that do not fit the local text
//! are rejected as [`CollabError::Desync`] instead of being guessed at.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::delta::{EditDelta, Position};
use crate::document::TextDocument;
use crate::guard::EditGuard;
use crate::peers::{PeerState, PeerTable, PendingPeers};
use crate::protocol::{CollabMessage, EditMessage, PeerId, ProtocolError};
use crate::session::Session;
use crate::transport::{Transport, TransportEvent};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct CollabConfig {
    /// Prefix prepended to the session token to form the transport room name
    pub room_prefix: String,
    /// Stripped from outbound paths and prepended to inbound ones
    pub project_root: String,
    /// Base URL used when logging the shareable link
    pub share_base_url: String,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            room_prefix: "meshpad-".to_string(),
            project_root: String::new(),
            share_base_url: "http://localhost:8000/src/hosted.html".to_string(),
        }
    }
}

/// Engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollabStats {
    pub edits_sent: u64,
    pub edits_applied: u64,
    pub edits_dropped: u64,
    pub echoes_suppressed: u64,
    pub seeds_sent: u64,
    pub seeds_applied: u64,
    pub desyncs: u64,
}

/// Why an event was deliberately not acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Another guarded operation is in flight
    GuardHeld,
    /// No document is attached yet
    Unattached,
    /// The edit targets a document that is not open here
    PathMismatch,
    /// A seed was requested for a peer that is not pending
    NotPending,
}

/// Outcome of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// The room was joined and presence announced
    Joined(PeerId),
    /// Peer membership changed
    PeerTracked(PeerId),
    /// The peer announced itself and waits for a seed
    Pending(PeerId),
    /// The full document was sent to the peer
    Seeded(PeerId),
    /// A remote edit was applied
    Applied,
    /// A seed replaced the local document
    SeedApplied,
    Ignored(IgnoreReason),
}

/// Engine errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollabError {
    /// A remote edit does not fit the local text
    Desync {
        path: String,
        offset: usize,
        removed: usize,
        len: usize,
    },
    Protocol(ProtocolError),
}

impl std::fmt::Display for CollabError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Desync {
                path,
                offset,
                removed,
                len,
            } => write!(
                f,
                "Desync on {path}: cannot remove {removed} chars at offset {offset} of {len}"
            ),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
        }
    }
}

impl std::error::Error for CollabError {}

impl From<ProtocolError> for CollabError {
    fn from(e: ProtocolError) -> Self {
        CollabError::Protocol(e)
    }
}

/// Synchronizes one attached document with every peer in a room.
pub struct Collaboration<T: Transport, D: TextDocument> {
    session: Session,
    config: CollabConfig,
    transport: T,
    document: Option<D>,
    guard: Arc<EditGuard>,
    pending: PendingPeers,
    peers: PeerTable,
    local_id: Option<PeerId>,
    stats: CollabStats,
}

impl<T: Transport, D: TextDocument> Collaboration<T, D> {
    /// Create an engine for `session`, talking through `transport`.
    pub fn new(session: Session, transport: T, config: CollabConfig) -> Self {
        log::info!("Link -> {}", session.share_link(&config.share_base_url));
        Self {
            session,
            config,
            local_id: transport.local_id(),
            transport,
            document: None,
            guard: Arc::new(EditGuard::new()),
            pending: PendingPeers::new(),
            peers: PeerTable::new(),
            stats: CollabStats::default(),
        }
    }

    /// Attach the document to synchronize. Peers that announced before the
    /// document was available are seeded now; their ids are returned.
    pub fn attach_document(&mut self, document: D) -> Vec<PeerId> {
        log::debug!("Attached document {}", document.path());
        self.document = Some(document);

        let waiting: Vec<PeerId> = self.pending.iter().collect();
        let mut seeded = Vec::new();
        for peer in waiting {
            match self.seed_peer(peer) {
                Ok(Handled::Seeded(peer)) => seeded.push(peer),
                Ok(_) => {}
                Err(e) => log::warn!("Failed to seed peer {peer}: {e}"),
            }
        }
        seeded
    }

    /// Detach and return the document. Later document messages are no-ops.
    pub fn detach_document(&mut self) -> Option<D> {
        self.document.take()
    }

    pub fn document(&self) -> Option<&D> {
        self.document.as_ref()
    }

    /// Mutable access for editors that report their own changes through
    /// [`Collaboration::on_local_change`].
    pub fn document_mut(&mut self) -> Option<&mut D> {
        self.document.as_mut()
    }

    /// Broadcast a presence announcement, asking peers for a seed.
    pub fn announce(&self) -> Result<(), CollabError> {
        self.transport.send_to_all(&CollabMessage::presence())?;
        Ok(())
    }

    /// Dispatch one transport event.
    pub fn handle_event(&mut self, event: TransportEvent) -> Result<Handled, CollabError> {
        match event {
            TransportEvent::Joined { local_id } => {
                self.local_id = Some(local_id);
                log::info!(
                    "Joined room {} as {local_id}",
                    self.session.room_name(&self.config.room_prefix)
                );
                self.announce()?;
                Ok(Handled::Joined(local_id))
            }
            TransportEvent::PeerConnected(peer) => {
                if self.peers.connect(peer) {
                    log::info!("Peer {peer} connected");
                }
                Ok(Handled::PeerTracked(peer))
            }
            TransportEvent::PeerDisconnected(peer) => {
                self.peers.disconnect(peer);
                if self.pending.remove(peer) {
                    log::debug!("Peer {peer} left before being seeded");
                }
                log::info!("Peer {peer} disconnected");
                Ok(Handled::PeerTracked(peer))
            }
            TransportEvent::Message { from, message } => self.handle_message(from, message),
        }
    }

    /// Handle one message received from `from`.
    pub fn handle_message(
        &mut self,
        from: PeerId,
        message: CollabMessage,
    ) -> Result<Handled, CollabError> {
        log::trace!("{:?} from {from}", message.message_type());
        match message {
            CollabMessage::PresenceAnnounce => self.on_presence(from),
            CollabMessage::Edit(edit) => self.apply_remote_edit(&edit),
            CollabMessage::Seed(text) => Ok(self.apply_seed(&text)),
        }
    }

    fn on_presence(&mut self, from: PeerId) -> Result<Handled, CollabError> {
        self.pending.mark_pending(from);
        self.peers.set_state(from, PeerState::Pending);

        if self.document.is_none() {
            log::debug!("Peer {from} is pending until a document is attached");
            return Ok(Handled::Pending(from));
        }
        self.seed_peer(from)
    }

    /// Send the full document to a pending peer and mark it synced.
    pub fn seed_peer(&mut self, peer: PeerId) -> Result<Handled, CollabError> {
        if !self.pending.contains(peer) {
            return Ok(Handled::Ignored(IgnoreReason::NotPending));
        }
        let guard = Arc::clone(&self.guard);
        let Some(_token) = guard.try_acquire() else {
            return Ok(Handled::Ignored(IgnoreReason::GuardHeld));
        };
        let Some(document) = self.document.as_ref() else {
            return Ok(Handled::Ignored(IgnoreReason::Unattached));
        };

        self.transport.send(peer, &CollabMessage::seed(document.text()))?;
        self.pending.resolve_on_seed(peer);
        self.peers.set_state(peer, PeerState::Synced);
        self.stats.seeds_sent += 1;
        log::info!("Seeded peer {peer} with {}", document.path());
        Ok(Handled::Seeded(peer))
    }

    /// Apply an edit received from a peer.
    pub fn apply_remote_edit(&mut self, edit: &EditMessage) -> Result<Handled, CollabError> {
        let guard = Arc::clone(&self.guard);
        let Some(_token) = guard.try_acquire() else {
            self.stats.edits_dropped += 1;
            log::debug!("Dropped edit for {} while guard is held", edit.path);
            return Ok(Handled::Ignored(IgnoreReason::GuardHeld));
        };
        let full_path = self.resolve_path(&edit.path);
        let Some(document) = self.document.as_mut() else {
            return Ok(Handled::Ignored(IgnoreReason::Unattached));
        };
        if document.path() != full_path {
            log::debug!(
                "Client changing {full_path}, open file is {}",
                document.path()
            );
            return Ok(Handled::Ignored(IgnoreReason::PathMismatch));
        }

        let delta = &edit.delta;
        let start = document.offset_from_position(delta.from);
        let removed = delta.removed_len();
        let len = document.len_chars();
        if document.position_from_offset(start) != delta.from || start + removed > len {
            self.stats.desyncs += 1;
            let err = CollabError::Desync {
                path: full_path,
                offset: start,
                removed,
                len,
            };
            log::warn!("{err}");
            return Err(err);
        }

        if !delta.removed.is_empty() {
            let from = document.position_from_offset(start);
            let to = document.position_from_offset(start + removed);
            document.replace_range("", from, to);
        }
        let at = document.position_from_offset(start);
        document.replace_range(&delta.inserted_text(), at, at);

        self.stats.edits_applied += 1;
        Ok(Handled::Applied)
    }

    /// Replace the local document with a seed received from a peer.
    pub fn apply_seed(&mut self, text: &str) -> Handled {
        let guard = Arc::clone(&self.guard);
        let Some(_token) = guard.try_acquire() else {
            log::debug!("Dropped seed while guard is held");
            return Handled::Ignored(IgnoreReason::GuardHeld);
        };
        let Some(document) = self.document.as_mut() else {
            return Handled::Ignored(IgnoreReason::Unattached);
        };

        document.set_text(text);
        self.stats.seeds_applied += 1;
        log::info!("Document {} seeded ({} chars)", document.path(), document.len_chars());
        Handled::SeedApplied
    }

    /// Broadcast edits the editor made to the document at `path`.
    ///
    /// Returns the number of edit messages sent; zero when the guard is held,
    /// i.e. when the change is the engine's own remote apply.
    pub fn on_local_change(
        &mut self,
        path: &str,
        deltas: &[EditDelta],
    ) -> Result<usize, CollabError> {
        let guard = Arc::clone(&self.guard);
        let Some(_token) = guard.try_acquire() else {
            self.stats.echoes_suppressed += 1;
            return Ok(0);
        };

        let relative = self.relative_path(path);
        for delta in deltas {
            self.transport
                .send_to_all(&CollabMessage::edit(relative.clone(), delta.clone()))?;
            self.stats.edits_sent += 1;
        }
        Ok(deltas.len())
    }

    /// Replace `from..to` with `text` in the attached document and broadcast
    /// the change.
    pub fn edit_local(
        &mut self,
        from: Position,
        to: Position,
        text: &str,
    ) -> Result<usize, CollabError> {
        let Some(document) = self.document.as_mut() else {
            return Ok(0);
        };
        let delta = document.replace_range(text, from, to);
        let path = document.path().to_string();
        self.on_local_change(&path, &[delta])
    }

    /// Process every event currently queued on `events` without waiting.
    pub fn pump(&mut self, events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> usize {
        let mut processed = 0;
        while let Ok(event) = events.try_recv() {
            self.dispatch(event);
            processed += 1;
        }
        processed
    }

    /// Process events until the transport closes the channel.
    pub async fn run(&mut self, events: &mut mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event);
        }
        log::info!(
            "Transport closed for room {}",
            self.session.room_name(&self.config.room_prefix)
        );
    }

    fn dispatch(&mut self, event: TransportEvent) {
        if let Err(e) = self.handle_event(event) {
            log::warn!("Failed to handle transport event: {e}");
        }
    }

    fn resolve_path(&self, relative: &str) -> String {
        format!("{}{relative}", self.config.project_root)
    }

    fn relative_path(&self, full: &str) -> String {
        full.strip_prefix(self.config.project_root.as_str())
            .unwrap_or(full)
            .to_string()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &CollabConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Shared handle to this document's guard.
    pub fn guard(&self) -> Arc<EditGuard> {
        Arc::clone(&self.guard)
    }

    pub fn pending(&self) -> &PendingPeers {
        &self.pending
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn local_id(&self) -> Option<PeerId> {
        self.local_id
    }

    pub fn stats(&self) -> CollabStats {
        self.stats.clone()
    }
}
