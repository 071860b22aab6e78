//! Integration tests for collaboration through the WebSocket relay.
//!
//! These tests start a real relay and connect real peers, verifying the
//! full seed-then-edit pipeline over the network.

use meshpad_collab::{
    CollabConfig, Collaboration, LocalMesh, MemoryDocument, Position, ProtocolError, RelayConfig,
    RelayServer, Session, Transport, TransportEvent, WsTransport,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout, Duration};

type Peer = Collaboration<WsTransport, MemoryDocument>;

/// Start a relay on a free port, return its WebSocket URL.
async fn start_test_relay(config: RelayConfig) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = RelayServer::new(config);
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });
    format!("ws://127.0.0.1:{port}")
}

async fn connect_peer(
    url: &str,
    session: &Session,
    document: MemoryDocument,
) -> (Peer, UnboundedReceiver<TransportEvent>) {
    let config = CollabConfig::default();
    let room = session.room_name(&config.room_prefix);
    let (transport, events) = WsTransport::connect(url, &room).await.unwrap();
    let mut collab = Collaboration::new(session.clone(), transport, config);
    collab.attach_document(document);
    (collab, events)
}

/// Handle events until none arrive for a short while.
async fn settle(collab: &mut Peer, events: &mut UnboundedReceiver<TransportEvent>) {
    while let Ok(Some(event)) = timeout(Duration::from_millis(200), events.recv()).await {
        let _ = collab.handle_event(event);
    }
}

fn text(collab: &Peer) -> &str {
    collab.document().unwrap().as_str()
}

#[tokio::test]
async fn test_transport_join_welcome() {
    let url = start_test_relay(RelayConfig::default()).await;

    let (a, mut a_events) = WsTransport::connect(&url, "meshpad-room").await.unwrap();
    let a_id = a.local_id().unwrap();
    assert_eq!(
        a_events.recv().await,
        Some(TransportEvent::Joined { local_id: a_id })
    );

    let (b, mut b_events) = WsTransport::connect(&url, "meshpad-room").await.unwrap();
    let b_id = b.local_id().unwrap();
    assert_eq!(
        b_events.recv().await,
        Some(TransportEvent::Joined { local_id: b_id })
    );
    assert_eq!(b_events.recv().await, Some(TransportEvent::PeerConnected(a_id)));

    let event = timeout(Duration::from_secs(2), a_events.recv()).await.unwrap();
    assert_eq!(event, Some(TransportEvent::PeerConnected(b_id)));
}

#[tokio::test]
async fn test_end_to_end_seed_and_edit() {
    let url = start_test_relay(RelayConfig::default()).await;
    let session = Session::generate();

    let (mut a, mut a_events) =
        connect_peer(&url, &session, MemoryDocument::new("/main.txt", "hello world")).await;
    settle(&mut a, &mut a_events).await;

    let (mut b, mut b_events) =
        connect_peer(&url, &session, MemoryDocument::empty("/main.txt")).await;

    // B announces, A seeds, B applies.
    settle(&mut b, &mut b_events).await;
    settle(&mut a, &mut a_events).await;
    settle(&mut b, &mut b_events).await;
    assert_eq!(text(&b), "hello world");
    assert_eq!(a.stats().seeds_sent, 1);

    a.edit_local(Position::new(0, 6), Position::new(0, 11), "brackets")
        .unwrap();
    settle(&mut b, &mut b_events).await;

    assert_eq!(text(&a), "hello brackets");
    assert_eq!(text(&b), "hello brackets");
}

#[tokio::test]
async fn test_disconnect_is_observed() {
    let url = start_test_relay(RelayConfig::default()).await;
    let session = Session::generate();

    let (mut a, mut a_events) =
        connect_peer(&url, &session, MemoryDocument::new("/main.txt", "text")).await;
    settle(&mut a, &mut a_events).await;

    let (b, mut b_events) = connect_peer(&url, &session, MemoryDocument::empty("/main.txt")).await;
    let b_id = b.local_id().unwrap();
    while b_events.try_recv().is_ok() {}
    settle(&mut a, &mut a_events).await;
    assert!(a.peers().state(b_id).is_some());

    drop(b);
    drop(b_events);
    settle(&mut a, &mut a_events).await;

    assert_eq!(a.peers().state(b_id), None);
}

#[tokio::test]
async fn test_room_full_is_rejected() {
    let url = start_test_relay(RelayConfig {
        max_peers_per_room: 1,
        ..RelayConfig::default()
    })
    .await;

    let _first = WsTransport::connect(&url, "meshpad-tiny").await.unwrap();
    let second = WsTransport::connect(&url, "meshpad-tiny").await;
    assert!(matches!(second, Err(ProtocolError::RoomFull)));

    // Other rooms are unaffected.
    assert!(WsTransport::connect(&url, "meshpad-other").await.is_ok());
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let result = WsTransport::connect(&format!("ws://127.0.0.1:{port}"), "meshpad-x").await;
    assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
}

#[tokio::test]
async fn test_run_loop_drives_engine() {
    // The async driver works the same over the in-process mesh.
    let mesh = LocalMesh::new();
    let session = Session::generate();
    let room = session.room_name("meshpad-");

    let (ta, mut a_events) = mesh.join(&room);
    let mut a: Collaboration<_, MemoryDocument> =
        Collaboration::new(session.clone(), ta, CollabConfig::default());
    a.attach_document(MemoryDocument::new("/main.txt", "served"));
    a.pump(&mut a_events);

    let (tb, mut b_events) = mesh.join(&room);
    let mut b = Collaboration::new(session.clone(), tb, CollabConfig::default());
    b.attach_document(MemoryDocument::empty("/main.txt"));

    let driver = tokio::spawn(async move {
        a.run(&mut a_events).await;
        a
    });

    // B announces; A (in the driver task) seeds it.
    b.pump(&mut b_events);
    let seeded = timeout(Duration::from_secs(2), async {
        loop {
            b.pump(&mut b_events);
            if b.document().map(MemoryDocument::as_str) == Some("served") {
                break;
            }
            tokio::task::yield_now().await;
        }
    })
    .await;
    assert!(seeded.is_ok());

    // Leaving closes nothing for A, so stop the driver directly.
    driver.abort();
}
