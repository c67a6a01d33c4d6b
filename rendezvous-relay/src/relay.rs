//! Relay server core: shared state, WebSocket handler, and message routing.
//!
//! Each accepted WebSocket becomes one peer. On open the peer is told its
//! identifier and who else is connected, and everyone else is told about
//! the newcomer. Text frames are JSON envelopes forwarded to the peer named
//! in their `targetId`. When the connection ends, for whatever reason, the
//! remaining peers are told it left.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use rendezvous_proto::PeerId;
use rendezvous_proto::signal::{self, Envelope, ServerMessage};
use tokio::sync::mpsc;

use crate::config::DEFAULT_MAX_MESSAGE_SIZE;
use crate::registry::{Outbound, PeerRegistry, RegistryError};

/// Shared relay server state.
pub struct RelayState {
    /// Live peers and their outbound queues.
    pub registry: PeerRegistry,
    /// Largest inbound WebSocket message accepted.
    max_message_size: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a relay state with an empty registry and default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Creates a relay state with a custom inbound message size limit.
    #[must_use]
    pub fn with_config(max_message_size: usize) -> Self {
        Self {
            registry: PeerRegistry::new(),
            max_message_size,
        }
    }

    /// Largest inbound WebSocket message accepted, in bytes.
    #[must_use]
    pub const fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Send a WebSocket Close frame to all connected peers.
    ///
    /// Each writer task forwards the frame and stops; the resulting
    /// disconnects run the normal departure path.
    pub fn close_all_connections(&self) {
        for (peer_id, outbound) in self.registry.all_peers() {
            tracing::info!(peer_id = %peer_id, "sending close frame to peer");
            let _ = outbound.send(Message::Close(None));
        }
    }
}

/// How a connection left the active state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// Close frame, end of stream, or a local close.
    Closed,
    /// Transport failure, with its description.
    Error(String),
}

/// Registers a new connection and runs the join sequence.
///
/// The newcomer's `yourId` and `existingPeers` are queued before it becomes
/// visible to anyone else, so no `newPeer` about a later arrival can
/// overtake them.
///
/// # Errors
///
/// Returns [`RegistryError::AlreadyRegistered`] if the allocated identifier
/// is somehow already live. The connection must not proceed.
pub fn open_peer(state: &RelayState, outbound: Outbound) -> Result<PeerId, RegistryError> {
    let peer_id = state.registry.allocate();

    let others = state.registry.join(peer_id, outbound, |own, others| {
        send_signal(own, &ServerMessage::YourId { id: peer_id });
        if !others.is_empty() {
            send_signal(
                own,
                &ServerMessage::ExistingPeers {
                    peer_ids: others.to_vec(),
                },
            );
        }
    })?;

    tracing::info!(peer_id = %peer_id, existing = others.len(), "peer connected");

    broadcast(&others, &ServerMessage::NewPeer { peer_id });
    Ok(peer_id)
}

/// Handles one text frame from `sender`.
///
/// Malformed frames and unknown targets are logged and dropped; nothing is
/// reported back to the sender.
pub fn handle_text(state: &RelayState, sender: PeerId, text: &str) {
    let envelope = match Envelope::decode(text) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(peer_id = %sender, error = %e, "failed to parse message");
            return;
        }
    };

    let message_type = envelope.message_type().unwrap_or("<untyped>").to_string();
    tracing::debug!(peer_id = %sender, message_type = %message_type, "received message");

    let Some((target, outbound)) = envelope
        .target_id()
        .and_then(|target| state.registry.lookup(&target).map(|tx| (target, tx)))
    else {
        tracing::warn!(
            peer_id = %sender,
            target_id = ?envelope.target_field(),
            message_type = %message_type,
            "target peer not found"
        );
        return;
    };

    let forwarded = envelope.with_sender(sender);
    match forwarded.encode() {
        Ok(text) => {
            if outbound.send(Message::Text(text.into())).is_err() {
                tracing::debug!(target_id = %target, "target disconnected before delivery");
                return;
            }
            tracing::debug!(
                from = %sender,
                to = %target,
                message_type = %message_type,
                "forwarded message"
            );
        }
        Err(e) => {
            tracing::error!(peer_id = %sender, error = %e, "failed to encode forwarded message");
        }
    }
}

/// Runs the departure sequence for `peer_id`.
///
/// Safe to call more than once per connection: only the call that actually
/// removes the peer broadcasts `peerDisconnected`.
pub fn connection_ended(state: &RelayState, peer_id: PeerId, end: &ConnectionEnd) {
    match end {
        ConnectionEnd::Closed => tracing::info!(peer_id = %peer_id, "peer disconnected"),
        ConnectionEnd::Error(e) => {
            tracing::warn!(peer_id = %peer_id, error = %e, "connection error, dropping peer");
        }
    }

    let Some(remaining) = state.registry.leave(&peer_id) else {
        tracing::debug!(peer_id = %peer_id, "departure already handled");
        return;
    };

    broadcast(&remaining, &ServerMessage::PeerDisconnected { peer_id });
}

/// Handles an upgraded WebSocket connection for a single peer.
///
/// The connection lifecycle:
/// 1. Register the peer and run the join sequence.
/// 2. Spawn a writer draining the peer's outbound queue into the socket.
/// 3. Read frames and route them until the socket closes or fails.
/// 4. Unregister the peer and announce its departure.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let peer_id = match open_peer(&state, tx) {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "failed to register connection");
            return;
        }
    };

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = ws_sender.send(msg).await {
                return ConnectionEnd::Error(format!("write failed: {e}"));
            }
            if closing {
                break;
            }
        }
        ConnectionEnd::Closed
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => handle_text(&reader_state, peer_id, text.as_str()),
                Ok(Message::Binary(data)) => {
                    tracing::debug!(peer_id = %peer_id, len = data.len(), "ignoring binary frame");
                }
                Ok(Message::Close(_)) => {
                    tracing::debug!(peer_id = %peer_id, "received close frame");
                    return ConnectionEnd::Closed;
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Err(e) => return ConnectionEnd::Error(e.to_string()),
            }
        }
        ConnectionEnd::Closed
    });

    // Wait for either task to finish, then abort the other.
    let end = tokio::select! {
        res = &mut read_task => {
            write_task.abort();
            res
        }
        res = &mut write_task => {
            read_task.abort();
            res
        }
    };
    let end = end.unwrap_or_else(|e| ConnectionEnd::Error(format!("connection task failed: {e}")));

    connection_ended(&state, peer_id, &end);
}

/// Encodes and queues a relay message on one peer's outbound queue.
///
/// Returns `false` if the peer's connection is already gone.
fn send_signal(outbound: &Outbound, msg: &ServerMessage) -> bool {
    match signal::encode(msg) {
        Ok(text) => outbound.send(Message::Text(text.into())).is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode relay message");
            false
        }
    }
}

/// Queues `msg` for every peer in `recipients`, best effort.
fn broadcast(recipients: &[(PeerId, Outbound)], msg: &ServerMessage) {
    for (peer_id, outbound) in recipients {
        if !send_signal(outbound, msg) {
            tracing::debug!(peer_id = %peer_id, "skipping broadcast to closed peer");
        }
    }
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    // Upgrades are accepted on any path.
    let app = axum::Router::new().fallback(ws_handler).with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Starts the relay server in-process for testing.
///
/// Binds to `127.0.0.1:0` (OS-assigned port).
#[cfg(test)]
pub async fn start_test_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server")
}

/// Upgrades an HTTP request to a WebSocket connection, or answers
/// `501 Not Implemented` if it is not an upgrade request.
async fn ws_handler(
    State(state): State<Arc<RelayState>>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(ws) => ws
            .max_message_size(state.max_message_size())
            .on_failed_upgrade(|e| tracing::warn!(error = %e, "WebSocket upgrade failed"))
            .on_upgrade(move |socket| handle_socket(socket, state))
            .into_response(),
        Err(rejection) => {
            tracing::debug!(reason = %rejection, "rejecting non-WebSocket request");
            StatusCode::NOT_IMPLEMENTED.into_response()
        }
    }
}
