//! Connection registry: the set of currently connected peers.
//!
//! Every peer is reachable through the sending half of its connection's
//! outbound queue. All access goes through one mutex that is held only long
//! enough to mutate the map or copy a snapshot out of it; callers send to
//! the returned handles after the lock is released.

use std::collections::HashMap;

use axum::extract::ws::Message;
use parking_lot::Mutex;
use rendezvous_proto::PeerId;
use tokio::sync::mpsc;

/// Sending half of a peer's outbound message queue.
pub type Outbound = mpsc::UnboundedSender<Message>;

/// Errors reported by [`PeerRegistry`].
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The identifier is already bound to a live connection.
    #[error("peer {0} is already registered")]
    AlreadyRegistered(PeerId),
}

/// Registry of live peers keyed by [`PeerId`].
#[derive(Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<PeerId, Outbound>>,
}

impl PeerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates an identifier that no live peer currently holds.
    #[must_use]
    pub fn allocate(&self) -> PeerId {
        let peers = self.peers.lock();
        loop {
            let id = PeerId::generate();
            if !peers.contains_key(&id) {
                return id;
            }
        }
    }

    /// Inserts a peer.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyRegistered`] if `id` is live; the
    /// existing entry is left untouched.
    pub fn register(&self, id: PeerId, outbound: Outbound) -> Result<(), RegistryError> {
        self.join(id, outbound, |_, _| {}).map(drop)
    }

    /// Inserts a peer and returns a snapshot of every other peer, taken
    /// under the same lock acquisition.
    ///
    /// `greet` runs under the lock with the newcomer's own handle and the
    /// ids of the other peers, before the newcomer becomes visible. It must
    /// only enqueue, never block or await.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyRegistered`] if `id` is live; `greet`
    /// is not called in that case.
    pub fn join<F>(
        &self,
        id: PeerId,
        outbound: Outbound,
        greet: F,
    ) -> Result<Vec<(PeerId, Outbound)>, RegistryError>
    where
        F: FnOnce(&Outbound, &[PeerId]),
    {
        let mut peers = self.peers.lock();
        if peers.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        let others = snapshot(&peers);
        let other_ids: Vec<PeerId> = others.iter().map(|(peer, _)| *peer).collect();
        greet(&outbound, &other_ids);
        peers.insert(id, outbound);
        Ok(others)
    }

    /// Removes a peer, returning whether it was present.
    ///
    /// Removing an absent peer is a no-op.
    pub fn unregister(&self, id: &PeerId) -> bool {
        self.peers.lock().remove(id).is_some()
    }

    /// Removes a peer and, if it was present, returns a snapshot of the
    /// peers that remain.
    ///
    /// Returns `None` when the peer had already been removed, so at most one
    /// caller ever observes a given departure.
    pub fn leave(&self, id: &PeerId) -> Option<Vec<(PeerId, Outbound)>> {
        let mut peers = self.peers.lock();
        peers.remove(id)?;
        Some(snapshot(&peers))
    }

    /// Returns the outbound handle for `id`, if registered.
    #[must_use]
    pub fn lookup(&self, id: &PeerId) -> Option<Outbound> {
        self.peers.lock().get(id).cloned()
    }

    /// Whether `id` is currently registered.
    #[must_use]
    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.lock().contains_key(id)
    }

    /// Every registered identifier except `excluding`.
    #[must_use]
    pub fn all_ids(&self, excluding: Option<&PeerId>) -> Vec<PeerId> {
        self.peers
            .lock()
            .keys()
            .filter(|id| Some(*id) != excluding)
            .copied()
            .collect()
    }

    /// Snapshot of every registered peer.
    #[must_use]
    pub fn all_peers(&self) -> Vec<(PeerId, Outbound)> {
        snapshot(&self.peers.lock())
    }

    /// Number of registered peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    /// Whether no peers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }
}

fn snapshot(peers: &HashMap<PeerId, Outbound>) -> Vec<(PeerId, Outbound)> {
    peers.iter().map(|(id, tx)| (*id, tx.clone())).collect()
}
