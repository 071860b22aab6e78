//! Peer lifecycle tracking.
//!
//! ```text
//! PeerConnected ──► Announced ──(presence)──► Pending ──(seed sent)──► Synced
//!                                               ▲                        │
//!                                               └────(re-announce)───────┘
//! PeerDisconnected: removed from both the table and the pending registry
//! ```

use std::collections::HashMap;

use crate::protocol::PeerId;

/// Membership state of a remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Connected at the transport level, no presence announcement yet
    Announced,
    /// Announced presence, waiting for the full document
    Pending,
    /// Has been sent the full document
    Synced,
}

/// Peers that announced presence but have not been seeded yet.
///
/// Kept in announcement order so seeding at attach time is FIFO.
#[derive(Debug, Clone, Default)]
pub struct PendingPeers {
    queue: Vec<PeerId>,
}

impl PendingPeers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `peer` as pending. Returns false if it already was.
    pub fn mark_pending(&mut self, peer: PeerId) -> bool {
        if self.queue.contains(&peer) {
            return false;
        }
        self.queue.push(peer);
        true
    }

    /// Remove the first entry for `peer` after it has been seeded.
    pub fn resolve_on_seed(&mut self, peer: PeerId) -> bool {
        match self.queue.iter().position(|p| *p == peer) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }

    /// Drop every entry for a disconnected peer.
    pub fn remove(&mut self, peer: PeerId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|p| *p != peer);
        self.queue.len() != before
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.queue.contains(&peer)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.queue.iter().copied()
    }
}

/// Connected peers and their membership state.
#[derive(Debug, Clone, Default)]
pub struct PeerTable {
    peers: HashMap<PeerId, PeerState>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly connected peer. Returns false if it was already known.
    pub fn connect(&mut self, peer: PeerId) -> bool {
        if self.peers.contains_key(&peer) {
            return false;
        }
        self.peers.insert(peer, PeerState::Announced);
        true
    }

    /// Set the state of `peer`, tracking it if it was unknown.
    pub fn set_state(&mut self, peer: PeerId, state: PeerState) {
        self.peers.insert(peer, state);
    }

    pub fn disconnect(&mut self, peer: PeerId) -> Option<PeerState> {
        self.peers.remove(&peer)
    }

    pub fn state(&self, peer: PeerId) -> Option<PeerState> {
        self.peers.get(&peer).copied()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    /// Number of peers currently in `state`.
    pub fn count_in(&self, state: PeerState) -> usize {
        self.peers.values().filter(|s| **s == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_mark_pending_dedupes() {
        let mut pending = PendingPeers::new();
        let peer = Uuid::new_v4();

        assert!(pending.mark_pending(peer));
        assert!(!pending.mark_pending(peer));
        assert_eq!(pending.len(), 1);
        assert!(pending.contains(peer));
    }

    #[test]
    fn test_resolve_on_seed_once() {
        let mut pending = PendingPeers::new();
        let peer = Uuid::new_v4();
        pending.mark_pending(peer);

        assert!(pending.resolve_on_seed(peer));
        assert!(!pending.resolve_on_seed(peer));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_reannounce_after_seed() {
        let mut pending = PendingPeers::new();
        let peer = Uuid::new_v4();

        pending.mark_pending(peer);
        pending.resolve_on_seed(peer);
        assert!(pending.mark_pending(peer));
        assert!(pending.contains(peer));
    }

    #[test]
    fn test_fifo_order_and_remove() {
        let mut pending = PendingPeers::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        pending.mark_pending(a);
        pending.mark_pending(b);
        pending.mark_pending(c);

        assert!(pending.remove(b));
        assert!(!pending.remove(b));
        assert_eq!(pending.iter().collect::<Vec<_>>(), vec![a, c]);
    }

    #[test]
    fn test_peer_table_lifecycle() {
        let mut table = PeerTable::new();
        let peer = Uuid::new_v4();

        assert!(table.connect(peer));
        assert!(!table.connect(peer));
        assert_eq!(table.state(peer), Some(PeerState::Announced));

        table.set_state(peer, PeerState::Pending);
        assert_eq!(table.count_in(PeerState::Pending), 1);

        table.set_state(peer, PeerState::Synced);
        assert_eq!(table.state(peer), Some(PeerState::Synced));
        assert_eq!(table.count_in(PeerState::Pending), 0);

        assert_eq!(table.disconnect(peer), Some(PeerState::Synced));
        assert!(table.is_empty());
        assert_eq!(table.state(peer), None);
    }

    #[test]
    fn test_set_state_tracks_unknown_peer() {
        let mut table = PeerTable::new();
        let peer = Uuid::new_v4();
        table.set_state(peer, PeerState::Pending);
        assert_eq!(table.len(), 1);
        assert_eq!(table.ids(), vec![peer]);
    }
}
