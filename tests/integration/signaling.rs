// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! End-to-end tests for the rendezvous relay over real WebSocket connections.
//!
//! Each test starts an in-process relay on an OS-assigned port and drives it
//! with `tokio-tungstenite` clients, checking:
//! - the join sequence (`yourId`, `existingPeers`, `newPeer`)
//! - directed relay with a relay-stamped `senderId`
//! - silent drops for unknown targets and malformed frames
//! - departure announcements on graceful close and on abrupt disconnect

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rendezvous_proto::PeerId;
use rendezvous_proto::directory::PeerDirectory;
use rendezvous_proto::signal::{self, Envelope, Inbound, ServerMessage};
use rendezvous_relay::relay::{self, RelayState};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite;

type Ws = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// How long to wait before concluding that no frame is coming.
const QUIET: Duration = Duration::from_millis(200);

async fn start() -> (std::net::SocketAddr, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start relay");
    (addr, state)
}

async fn connect(addr: std::net::SocketAddr) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .expect("failed to connect");
    ws
}

/// Receive the next text frame, failing the test after a generous timeout.
async fn recv_text(ws: &mut Ws) -> String {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended")
        .expect("websocket error");
    msg.to_text().unwrap().to_string()
}

async fn recv_signal(ws: &mut Ws) -> ServerMessage {
    signal::decode(&recv_text(ws).await).unwrap()
}

async fn send_json(ws: &mut Ws, value: &Value) {
    ws.send(tungstenite::Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Assert that nothing arrives within [`QUIET`].
async fn assert_quiet(ws: &mut Ws) {
    if let Ok(Some(Ok(msg))) = tokio::time::timeout(QUIET, ws.next()).await {
        panic!("unexpected frame: {msg:?}");
    }
}

/// Connect and consume the `yourId` greeting.
async fn join(addr: std::net::SocketAddr) -> (PeerId, Ws) {
    let mut ws = connect(addr).await;
    match recv_signal(&mut ws).await {
        ServerMessage::YourId { id } => (id, ws),
        other => panic!("expected yourId, got {other:?}"),
    }
}

#[tokio::test]
async fn three_peers_join_then_middle_disconnects() {
    let (addr, state) = start().await;

    let (a, mut ws_a) = join(addr).await;

    let (b, mut ws_b) = join(addr).await;
    assert_eq!(
        recv_signal(&mut ws_b).await,
        ServerMessage::ExistingPeers { peer_ids: vec![a] }
    );
    assert_eq!(
        recv_signal(&mut ws_a).await,
        ServerMessage::NewPeer { peer_id: b }
    );

    let (c, mut ws_c) = join(addr).await;
    match recv_signal(&mut ws_c).await {
        ServerMessage::ExistingPeers { peer_ids } => {
            let got: HashSet<PeerId> = peer_ids.into_iter().collect();
            assert_eq!(got, HashSet::from([a, b]));
        }
        other => panic!("expected existingPeers, got {other:?}"),
    }
    assert_eq!(
        recv_signal(&mut ws_a).await,
        ServerMessage::NewPeer { peer_id: c }
    );
    assert_eq!(
        recv_signal(&mut ws_b).await,
        ServerMessage::NewPeer { peer_id: c }
    );

    assert_eq!(HashSet::from([a, b, c]).len(), 3);

    ws_b.close(None).await.unwrap();

    let gone = ServerMessage::PeerDisconnected { peer_id: b };
    assert_eq!(recv_signal(&mut ws_a).await, gone);
    assert_eq!(recv_signal(&mut ws_c).await, gone);

    let ids: HashSet<PeerId> = state.registry.all_ids(None).into_iter().collect();
    assert_eq!(ids, HashSet::from([a, c]));

    assert_quiet(&mut ws_a).await;
    assert_quiet(&mut ws_c).await;
}

#[tokio::test]
async fn lone_peer_gets_no_existing_peers() {
    let (addr, _state) = start().await;
    let (_a, mut ws_a) = join(addr).await;
    assert_quiet(&mut ws_a).await;
}

#[tokio::test]
async fn offer_is_relayed_with_sender_id() {
    let (addr, _state) = start().await;
    let (a, mut ws_a) = join(addr).await;
    let (b, mut ws_b) = join(addr).await;
    let _existing = recv_signal(&mut ws_b).await;
    let _new_peer = recv_signal(&mut ws_a).await;

    let offer = json!({
        "type": "offer",
        "targetId": b.to_string(),
        "sdp": {"type": "offer", "sdp": "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\n"},
    });
    send_json(&mut ws_a, &offer).await;

    let received: Value = serde_json::from_str(&recv_text(&mut ws_b).await).unwrap();
    let mut expected = offer;
    expected["senderId"] = json!(a.to_string());
    assert_eq!(received, expected);

    // B answers using the senderId it was given.
    let answer = Envelope::new("answer")
        .with_target(a)
        .with_field("sdp", json!({"type": "answer", "sdp": "v=0\r\n"}));
    send_json(&mut ws_b, &Value::Object(answer.into_fields())).await;

    match signal::decode_inbound(&recv_text(&mut ws_a).await).unwrap() {
        Inbound::Relayed(envelope) => {
            assert_eq!(envelope.message_type(), Some("answer"));
            assert_eq!(envelope.sender_id(), Some(b));
            assert_eq!(envelope.target_id(), Some(a));
        }
        other => panic!("expected relayed answer, got {other:?}"),
    }

    assert_quiet(&mut ws_a).await;
}

#[tokio::test]
async fn unknown_target_and_garbage_are_dropped_silently() {
    let (addr, state) = start().await;
    let (_a, mut ws_a) = join(addr).await;
    let (b, mut ws_b) = join(addr).await;
    let _existing = recv_signal(&mut ws_b).await;
    let _new_peer = recv_signal(&mut ws_a).await;

    send_json(
        &mut ws_a,
        &json!({"type": "candidate", "targetId": PeerId::generate().to_string()}),
    )
    .await;
    send_json(&mut ws_a, &json!({"type": "candidate"})).await;
    ws_a.send(tungstenite::Message::Text("{definitely not json".into()))
        .await
        .unwrap();
    ws_a.send(tungstenite::Message::Binary(vec![1, 2, 3].into()))
        .await
        .unwrap();

    assert_quiet(&mut ws_a).await;
    assert_quiet(&mut ws_b).await;

    // A is still connected and can still reach B.
    send_json(&mut ws_a, &json!({"type": "ping", "targetId": b.to_string()})).await;
    let envelope = Envelope::decode(&recv_text(&mut ws_b).await).unwrap();
    assert_eq!(envelope.message_type(), Some("ping"));
    assert_eq!(state.registry.len(), 2);
}

#[tokio::test]
async fn abrupt_disconnect_is_announced_once() {
    let (addr, state) = start().await;
    let (_a, mut ws_a) = join(addr).await;
    let (b, mut ws_b) = join(addr).await;
    let _existing = recv_signal(&mut ws_b).await;
    let _new_peer = recv_signal(&mut ws_a).await;

    // Drop without a close handshake.
    drop(ws_b);

    assert_eq!(
        recv_signal(&mut ws_a).await,
        ServerMessage::PeerDisconnected { peer_id: b }
    );
    assert_quiet(&mut ws_a).await;
    assert!(!state.registry.contains(&b));
}

#[tokio::test]
async fn directory_follows_relay_announcements() {
    let (addr, _state) = start().await;

    let mut ws_a = connect(addr).await;
    let mut dir_a = PeerDirectory::new();
    dir_a.apply(&recv_signal(&mut ws_a).await);

    let (b, mut ws_b) = join(addr).await;
    let _existing = recv_signal(&mut ws_b).await;
    dir_a.apply(&recv_signal(&mut ws_a).await);

    let (c, mut ws_c) = join(addr).await;
    let _existing = recv_signal(&mut ws_c).await;
    dir_a.apply(&recv_signal(&mut ws_a).await);

    assert_eq!(dir_a.peers(), &[b, c]);

    // The first-known peer leaving must still be removed.
    ws_b.close(None).await.unwrap();
    dir_a.apply(&recv_signal(&mut ws_a).await);
    assert_eq!(dir_a.peers(), &[c]);
    assert!(dir_a.own_id().is_some());
}

#[tokio::test]
async fn shutdown_closes_every_peer() {
    let (addr, state) = start().await;
    let (_a, mut ws_a) = join(addr).await;

    state.close_all_connections();

    let msg = tokio::time::timeout(Duration::from_secs(5), ws_a.next())
        .await
        .expect("timed out waiting for close");
    assert!(matches!(msg, Some(Ok(tungstenite::Message::Close(_))) | None));
}
