//! Client-side view of the peers known to the relay.
//!
//! A client feeds every [`ServerMessage`] it receives into a
//! [`PeerDirectory`] to learn its own identifier and keep track of which
//! other peers it can address.

use crate::peer::PeerId;
use crate::signal::ServerMessage;

/// The peer set as observed by one client, in order of arrival.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerDirectory {
    own_id: Option<PeerId>,
    peers: Vec<PeerId>,
}

impl PeerDirectory {
    /// Creates an empty directory with no identifier assigned yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            own_id: None,
            peers: Vec::new(),
        }
    }

    /// The identifier the relay assigned to this client, once known.
    #[must_use]
    pub const fn own_id(&self) -> Option<PeerId> {
        self.own_id
    }

    /// Other peers currently known, oldest first.
    #[must_use]
    pub fn peers(&self) -> &[PeerId] {
        &self.peers
    }

    /// Whether `peer` is currently known.
    #[must_use]
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.contains(peer)
    }

    /// Applies a relay message to the directory.
    pub fn apply(&mut self, msg: &ServerMessage) {
        match msg {
            ServerMessage::YourId { id } => {
                self.own_id = Some(*id);
                self.peers.retain(|p| p != id);
            }
            ServerMessage::ExistingPeers { peer_ids } => {
                self.peers.clear();
                for id in peer_ids {
                    self.insert(*id);
                }
            }
            ServerMessage::NewPeer { peer_id } => self.insert(*peer_id),
            ServerMessage::PeerDisconnected { peer_id } => {
                self.remove(peer_id);
            }
        }
    }

    /// Removes `peer`, returning whether it was known.
    pub fn remove(&mut self, peer: &PeerId) -> bool {
        // Index 0 is a hit like any other.
        match self.peers.iter().position(|p| p == peer) {
            Some(index) => {
                self.peers.remove(index);
                true
            }
            None => false,
        }
    }

    fn insert(&mut self, peer: PeerId) {
        if self.own_id == Some(peer) || self.peers.contains(&peer) {
            return;
        }
        self.peers.push(peer);
    }
}
