//! Peer transport contract and an in-process mesh implementation.
//!
//! The engine only needs three things from a transport: its own peer id,
//! unicast and broadcast. Everything the transport observes (joining,
//! peers coming and going, inbound messages) arrives as [`TransportEvent`]s
//! on an unbounded channel, so sends never suspend and handlers never overlap.
//!
//! Delivery is assumed best-effort, at-least-once and ordered per peer.
//! Sending to a peer that has gone away is not an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{CollabMessage, PeerId, ProtocolError};

/// Outbound side of a peer transport.
pub trait Transport {
    /// Our own peer id, once the room has been joined.
    fn local_id(&self) -> Option<PeerId>;

    /// Send `message` to a single peer.
    fn send(&self, peer: PeerId, message: &CollabMessage) -> Result<(), ProtocolError>;

    /// Send `message` to every other peer in the room.
    fn send_to_all(&self, message: &CollabMessage) -> Result<(), ProtocolError>;
}

/// Events observed by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The room was joined under `local_id`
    Joined { local_id: PeerId },
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
    /// A message arrived from `from`
    Message { from: PeerId, message: CollabMessage },
}

type RoomMap = HashMap<String, HashMap<PeerId, mpsc::UnboundedSender<TransportEvent>>>;

/// An in-process hub connecting any number of [`MeshTransport`]s by room.
///
/// Messages are encoded and decoded on the way through so that everything
/// crossing the mesh has survived the wire format.
#[derive(Debug, Clone, Default)]
pub struct LocalMesh {
    rooms: Arc<Mutex<RoomMap>>,
}

impl LocalMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `room`, returning the transport and its event stream.
    ///
    /// The joiner receives `Joined` followed by `PeerConnected` for every
    /// peer already present; those peers receive `PeerConnected` for it.
    pub fn join(&self, room: &str) -> (MeshTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let local_id = Uuid::new_v4();

        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        let members = rooms.entry(room.to_string()).or_default();

        let _ = tx.send(TransportEvent::Joined { local_id });
        for (peer, sender) in members.iter() {
            let _ = sender.send(TransportEvent::PeerConnected(local_id));
            let _ = tx.send(TransportEvent::PeerConnected(*peer));
        }
        members.insert(local_id, tx);
        log::debug!("Mesh peer {local_id} joined {room} ({} peers)", members.len());

        let transport = MeshTransport {
            mesh: self.clone(),
            room: room.to_string(),
            local_id,
        };
        (transport, rx)
    }

    /// Number of peers currently in `room`.
    pub fn peer_count(&self, room: &str) -> usize {
        let rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        rooms.get(room).map_or(0, HashMap::len)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn deliver(
        &self,
        room: &str,
        from: PeerId,
        to: Option<PeerId>,
        message: &CollabMessage,
    ) -> Result<usize, ProtocolError> {
        let message = CollabMessage::decode(&message.encode()?)?;

        let rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(members) = rooms.get(room) else {
            return Ok(0);
        };

        let mut delivered = 0;
        for (peer, sender) in members {
            if *peer == from || to.is_some_and(|target| target != *peer) {
                continue;
            }
            let event = TransportEvent::Message {
                from,
                message: message.clone(),
            };
            if sender.send(event).is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    fn leave(&self, room: &str, peer: PeerId) {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(members) = rooms.get_mut(room) else {
            return;
        };
        if members.remove(&peer).is_none() {
            return;
        }
        for sender in members.values() {
            let _ = sender.send(TransportEvent::PeerDisconnected(peer));
        }
        if members.is_empty() {
            rooms.remove(room);
        }
        log::debug!("Mesh peer {peer} left {room}");
    }
}

/// One peer's handle on a [`LocalMesh`] room. Leaves the room when dropped.
#[derive(Debug)]
pub struct MeshTransport {
    mesh: LocalMesh,
    room: String,
    local_id: PeerId,
}

impl MeshTransport {
    pub fn id(&self) -> PeerId {
        self.local_id
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// Leave the room. Remaining peers observe `PeerDisconnected`.
    pub fn leave(&self) {
        self.mesh.leave(&self.room, self.local_id);
    }
}

impl Transport for MeshTransport {
    fn local_id(&self) -> Option<PeerId> {
        Some(self.local_id)
    }

    fn send(&self, peer: PeerId, message: &CollabMessage) -> Result<(), ProtocolError> {
        self.mesh
            .deliver(&self.room, self.local_id, Some(peer), message)
            .map(|_| ())
    }

    fn send_to_all(&self, message: &CollabMessage) -> Result<(), ProtocolError> {
        self.mesh
            .deliver(&self.room, self.local_id, None, message)
            .map(|_| ())
    }
}

impl Drop for MeshTransport {
    fn drop(&mut self) {
        self.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn test_join_announces_membership() {
        let mesh = LocalMesh::new();
        let (a, mut a_rx) = mesh.join("room");
        let (b, mut b_rx) = mesh.join("room");

        assert_eq!(
            drain(&mut a_rx),
            vec![
                TransportEvent::Joined { local_id: a.id() },
                TransportEvent::PeerConnected(b.id()),
            ]
        );
        assert_eq!(
            drain(&mut b_rx),
            vec![
                TransportEvent::Joined { local_id: b.id() },
                TransportEvent::PeerConnected(a.id()),
            ]
        );
        assert_eq!(mesh.peer_count("room"), 2);
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let mesh = LocalMesh::new();
        let (a, mut a_rx) = mesh.join("room");
        let (_b, mut b_rx) = mesh.join("room");
        let (_c, mut c_rx) = mesh.join("room");
        drain(&mut a_rx);
        drain(&mut b_rx);
        drain(&mut c_rx);

        a.send_to_all(&CollabMessage::presence()).unwrap();

        let expected = TransportEvent::Message {
            from: a.id(),
            message: CollabMessage::PresenceAnnounce,
        };
        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(drain(&mut b_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut c_rx), vec![expected]);
    }

    #[test]
    fn test_unicast_reaches_one_peer() {
        let mesh = LocalMesh::new();
        let (a, _a_rx) = mesh.join("room");
        let (b, mut b_rx) = mesh.join("room");
        let (_c, mut c_rx) = mesh.join("room");
        drain(&mut b_rx);
        drain(&mut c_rx);

        a.send(b.id(), &CollabMessage::seed("text")).unwrap();

        assert_eq!(drain(&mut b_rx).len(), 1);
        assert!(drain(&mut c_rx).is_empty());
    }

    #[test]
    fn test_rooms_are_isolated() {
        let mesh = LocalMesh::new();
        let (a, _a_rx) = mesh.join("room-1");
        let (_b, mut b_rx) = mesh.join("room-2");
        drain(&mut b_rx);

        a.send_to_all(&CollabMessage::presence()).unwrap();
        assert!(drain(&mut b_rx).is_empty());
        assert_eq!(mesh.room_count(), 2);
    }

    #[test]
    fn test_drop_disconnects() {
        let mesh = LocalMesh::new();
        let (a, mut a_rx) = mesh.join("room");
        let (b, _b_rx) = mesh.join("room");
        drain(&mut a_rx);

        let b_id = b.id();
        drop(b);

        assert_eq!(drain(&mut a_rx), vec![TransportEvent::PeerDisconnected(b_id)]);
        assert_eq!(mesh.peer_count("room"), 1);

        // Sending to a departed peer is silently a no-op.
        a.send(b_id, &CollabMessage::seed("late")).unwrap();

        drop(a);
        assert_eq!(mesh.room_count(), 0);
    }
}
