//! WebSocket signalling relay and the matching client transport.
//!
//! Architecture:
//! ```text
//! WsTransport A ──┐                          ┌──► WsTransport B
//!                 ├── RelayServer ── room ───┤
//! WsTransport C ──┘   (membership only)      └──► WsTransport D
//! ```
//!
//! The relay knows which peers are in which room and routes opaque payloads
//! between them. It never decodes a payload and never holds document state,
//! so the document lives only on the peers.
//!
//! Each connection gets a bounded outbound queue. A peer that falls behind
//! loses frames rather than stalling the room, which matches the best-effort
//! delivery the engine already tolerates.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::{CollabMessage, PeerId, ProtocolError, RelayFrame};
use crate::transport::{Transport, TransportEvent};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum peers per room
    pub max_peers_per_room: usize,
    /// Outbound frames buffered per connection
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9191".to_string(),
            max_peers_per_room: 64,
            channel_capacity: 256,
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub frames_relayed: u64,
    pub frames_dropped: u64,
    pub active_rooms: usize,
}

type FrameSender = mpsc::Sender<Arc<Vec<u8>>>;

/// Members of one room and their outbound queues.
#[derive(Default)]
struct RelayRoom {
    peers: HashMap<PeerId, FrameSender>,
}

impl RelayRoom {
    /// Queue `frame` for every member except `except`. Returns the number of
    /// members that accepted it.
    fn fan_out(&self, except: PeerId, frame: &Arc<Vec<u8>>, stats: &mut RelayStats) -> usize {
        let mut delivered = 0;
        for (peer, sender) in &self.peers {
            if *peer == except {
                continue;
            }
            if Self::push(*peer, sender, frame, stats) {
                delivered += 1;
            }
        }
        delivered
    }

    fn push(peer: PeerId, sender: &FrameSender, frame: &Arc<Vec<u8>>, stats: &mut RelayStats) -> bool {
        match sender.try_send(frame.clone()) {
            Ok(()) => {
                stats.frames_relayed += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("Peer {peer} lagging, dropped a frame");
                stats.frames_dropped += 1;
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

type Rooms = Arc<RwLock<HashMap<String, RelayRoom>>>;

/// The signalling relay.
pub struct RelayServer {
    config: RelayConfig,
    rooms: Rooms,
    stats: Arc<RwLock<RelayStats>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(RelayStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Bind the configured address and serve until an accept error.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        log::info!("Relay listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, rooms, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        rooms: Rooms,
        stats: Arc<RwLock<RelayStats>>,
        config: RelayConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let (out_tx, mut out_rx) = mpsc::channel::<Arc<Vec<u8>>>(config.channel_capacity);
        let mut membership: Option<(String, PeerId)> = None;

        let result = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        let data = match msg {
                            Some(Ok(Message::Binary(data))) => data,
                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                                continue;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }
                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }
                            Some(Ok(_)) => continue,
                        };

                        let frame = match RelayFrame::decode(&data) {
                            Ok(frame) => frame,
                            Err(e) => {
                                log::warn!("Failed to decode frame from {addr}: {e}");
                                continue;
                            }
                        };

                        match frame {
                            RelayFrame::Join { room } if membership.is_none() => {
                                match Self::join(&rooms, &stats, &config, &room, out_tx.clone()).await? {
                                    Some(welcome) => {
                                        if let RelayFrame::Welcome { peer_id, .. } = &welcome {
                                            log::info!("Peer {peer_id} joined room {room} from {addr}");
                                            membership = Some((room, *peer_id));
                                        }
                                        ws_sender.send(Message::Binary(welcome.encode()?.into())).await?;
                                    }
                                    None => {
                                        log::warn!("Room {room} is full, rejecting {addr}");
                                        ws_sender.send(Message::Binary(RelayFrame::RoomFull.encode()?.into())).await?;
                                        break;
                                    }
                                }
                            }
                            RelayFrame::Send { to, payload } => match &membership {
                                Some((room, from)) => {
                                    Self::route(&rooms, &stats, room, *from, to, payload).await?;
                                }
                                None => log::debug!("Ignoring send before join from {addr}"),
                            },
                            other => {
                                log::debug!("Ignoring out-of-sequence frame from {addr}: {other:?}");
                            }
                        }
                    }

                    frame = out_rx.recv() => {
                        match frame {
                            Some(bytes) => {
                                ws_sender.send(Message::Binary(bytes.to_vec().into())).await?;
                            }
                            None => break,
                        }
                    }
                }
            }
            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
        }
        .await;

        if let Some((room, peer_id)) = membership {
            Self::leave(&rooms, &stats, &room, peer_id).await;
        }
        stats.write().await.active_connections -= 1;

        result
    }

    /// Add a peer to `room`. Returns the welcome frame, or `None` when the
    /// room is full.
    async fn join(
        rooms: &Rooms,
        stats: &Arc<RwLock<RelayStats>>,
        config: &RelayConfig,
        room: &str,
        sender: FrameSender,
    ) -> Result<Option<RelayFrame>, ProtocolError> {
        let mut rooms_w = rooms.write().await;
        let members = rooms_w.entry(room.to_string()).or_default();
        if members.peers.len() >= config.max_peers_per_room {
            if members.peers.is_empty() {
                rooms_w.remove(room);
            }
            return Ok(None);
        }

        let peer_id = Uuid::new_v4();
        let existing: Vec<PeerId> = members.peers.keys().copied().collect();

        let notice = Arc::new(RelayFrame::PeerConnected(peer_id).encode()?);
        let mut s = stats.write().await;
        members.fan_out(peer_id, &notice, &mut s);
        members.peers.insert(peer_id, sender);
        s.active_rooms = rooms_w.len();

        Ok(Some(RelayFrame::Welcome {
            peer_id,
            peers: existing,
        }))
    }

    /// Forward a payload from `from` to one peer or the rest of the room.
    async fn route(
        rooms: &Rooms,
        stats: &Arc<RwLock<RelayStats>>,
        room: &str,
        from: PeerId,
        to: Option<PeerId>,
        payload: Vec<u8>,
    ) -> Result<(), ProtocolError> {
        let frame = Arc::new(RelayFrame::Deliver { from, payload }.encode()?);

        let rooms_r = rooms.read().await;
        let Some(members) = rooms_r.get(room) else {
            return Ok(());
        };
        let mut s = stats.write().await;
        match to {
            Some(peer) => match members.peers.get(&peer) {
                Some(sender) if peer != from => {
                    RelayRoom::push(peer, sender, &frame, &mut s);
                }
                _ => log::debug!("Dropping frame for absent peer {peer}"),
            },
            None => {
                members.fan_out(from, &frame, &mut s);
            }
        }
        Ok(())
    }

    /// Remove a peer, notify the room, and drop the room once empty.
    async fn leave(rooms: &Rooms, stats: &Arc<RwLock<RelayStats>>, room: &str, peer_id: PeerId) {
        let mut rooms_w = rooms.write().await;
        let Some(members) = rooms_w.get_mut(room) else {
            return;
        };
        members.peers.remove(&peer_id);

        let mut s = stats.write().await;
        match RelayFrame::PeerDisconnected(peer_id).encode() {
            Ok(bytes) => {
                members.fan_out(peer_id, &Arc::new(bytes), &mut s);
            }
            Err(e) => log::error!("Failed to encode disconnect notice: {e}"),
        }

        if members.peers.is_empty() {
            rooms_w.remove(room);
            log::info!("Room {room} removed (empty)");
        }
        s.active_rooms = rooms_w.len();
        log::info!("Peer {peer_id} left room {room}");
    }

    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}

/// Client side of the relay: a [`Transport`] over one WebSocket.
pub struct WsTransport {
    local_id: PeerId,
    room: String,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
}

impl WsTransport {
    /// Connect to the relay at `url` and join `room`.
    ///
    /// The returned receiver starts with `Joined` and a `PeerConnected` for
    /// every peer already in the room.
    pub async fn connect(
        url: &str,
        room: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>), ProtocolError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            log::error!("Failed to connect to relay {url}: {e}");
            ProtocolError::ConnectionClosed
        })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let join = RelayFrame::Join {
            room: room.to_string(),
        };
        ws_writer
            .send(Message::Binary(join.encode()?.into()))
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;

        let (local_id, peers) = loop {
            match ws_reader.next().await {
                Some(Ok(Message::Binary(data))) => match RelayFrame::decode(&data)? {
                    RelayFrame::Welcome { peer_id, peers } => break (peer_id, peers),
                    RelayFrame::RoomFull => return Err(ProtocolError::RoomFull),
                    other => return Err(ProtocolError::UnexpectedFrame(format!("{other:?}"))),
                },
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return Err(ProtocolError::ConnectionClosed),
            }
        };

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let _ = event_tx.send(TransportEvent::Joined { local_id });
        for peer in peers {
            let _ = event_tx.send(TransportEvent::PeerConnected(peer));
        }

        // Writer task: forward outgoing frames to the WebSocket
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader task: turn relay frames into transport events
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let data = match msg {
                    Ok(Message::Binary(data)) => data,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let event = match RelayFrame::decode(&data) {
                    Ok(RelayFrame::PeerConnected(peer)) => TransportEvent::PeerConnected(peer),
                    Ok(RelayFrame::PeerDisconnected(peer)) => TransportEvent::PeerDisconnected(peer),
                    Ok(RelayFrame::Deliver { from, payload }) => match CollabMessage::decode(&payload) {
                        Ok(message) => TransportEvent::Message { from, message },
                        Err(e) => {
                            log::warn!("Undecodable payload from {from}: {e}");
                            continue;
                        }
                    },
                    Ok(other) => {
                        log::debug!("Ignoring relay frame {other:?}");
                        continue;
                    }
                    Err(e) => {
                        log::warn!("Failed to decode relay frame: {e}");
                        continue;
                    }
                };
                if event_tx.send(event).is_err() {
                    break;
                }
            }
            log::info!("Relay connection closed for {local_id}");
        });

        Ok((
            Self {
                local_id,
                room: room.to_string(),
                outgoing: out_tx,
            },
            event_rx,
        ))
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    fn route(&self, to: Option<PeerId>, message: &CollabMessage) -> Result<(), ProtocolError> {
        let frame = RelayFrame::Send {
            to,
            payload: message.encode()?,
        };
        self.outgoing
            .send(frame.encode()?)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}

impl Transport for WsTransport {
    fn local_id(&self) -> Option<PeerId> {
        Some(self.local_id)
    }

    fn send(&self, peer: PeerId, message: &CollabMessage) -> Result<(), ProtocolError> {
        self.route(Some(peer), message)
    }

    fn send_to_all(&self, message: &CollabMessage) -> Result<(), ProtocolError> {
        self.route(None, message)
    }
}
