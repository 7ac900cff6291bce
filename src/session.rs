//! Session table
//!
//! The set of live peer connections, keyed by their poll registration.
//! Iteration order follows registration order and is stable.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use crate::peer::Peer;
use crate::types::PeerId;

/// All currently connected peers
#[derive(Debug)]
pub struct SessionTable<S> {
    peers: BTreeMap<PeerId, Peer<S>>,
}

impl<S> Default for SessionTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SessionTable<S> {
    pub fn new() -> Self {
        Self {
            peers: BTreeMap::new(),
        }
    }

    /// Add a peer, returning any entry previously stored under its id
    pub fn insert(&mut self, peer: Peer<S>) -> Option<Peer<S>> {
        self.peers.insert(peer.id, peer)
    }

    /// Remove a peer
    ///
    /// Removing an id that is not present is a no-op and returns `None`.
    pub fn remove(&mut self, id: PeerId) -> Option<Peer<S>> {
        self.peers.remove(&id)
    }

    pub fn get(&self, id: PeerId) -> Option<&Peer<S>> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer<S>> {
        self.peers.get_mut(&id)
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Snapshot of the current ids, safe to iterate while removing
    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer<S>> {
        self.peers.values_mut()
    }

    /// Remote addresses of every peer, for diagnostics
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.peers.values().map(|peer| peer.addr).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::mock::{peer, MockStream};

    #[test]
    fn test_insert_and_lookup() {
        let mut table = SessionTable::new();
        assert!(table.is_empty());

        assert!(table.insert(peer(3, MockStream::unlimited())).is_none());
        assert!(table.insert(peer(2, MockStream::unlimited())).is_none());

        assert_eq!(table.len(), 2);
        assert!(table.contains(PeerId(3)));
        assert_eq!(table.get(PeerId(2)).map(|p| p.id), Some(PeerId(2)));
    }

    #[test]
    fn test_ids_are_ordered() {
        let mut table = SessionTable::new();
        for id in [5, 1, 3] {
            table.insert(peer(id, MockStream::unlimited()));
        }
        assert_eq!(table.ids(), vec![PeerId(1), PeerId(3), PeerId(5)]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut table = SessionTable::new();
        table.insert(peer(1, MockStream::unlimited()));

        assert!(table.remove(PeerId(1)).is_some());
        assert!(table.remove(PeerId(1)).is_none());
        assert!(table.remove(PeerId(42)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_remove_while_walking_snapshot() {
        let mut table = SessionTable::new();
        for id in 1..=4 {
            table.insert(peer(id, MockStream::unlimited()));
        }

        let mut visited = Vec::new();
        for id in table.ids() {
            visited.push(id);
            if id.0 % 2 == 0 {
                table.remove(id);
            }
        }

        assert_eq!(visited.len(), 4);
        assert_eq!(table.ids(), vec![PeerId(1), PeerId(3)]);
    }
}
