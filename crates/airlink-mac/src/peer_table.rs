//! # Peer Table
//!
//! Slab-backed arena of per-peer state records. Records are created lazily
//! on first contact and live for the rest of the session; lookups go through
//! an address index so no engine holds references into another's state.

use slab::Slab;
use std::collections::HashMap;

use crate::frame::PeerAddress;

/// Stable handle to a record in a [`PeerTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerHandle(pub usize);

#[derive(Debug)]
pub struct PeerTable<T> {
    records: Slab<(PeerAddress, T)>,
    index: HashMap<PeerAddress, PeerHandle>,
}

impl<T> Default for PeerTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PeerTable<T> {
    pub fn new() -> Self {
        PeerTable {
            records: Slab::new(),
            index: HashMap::new(),
        }
    }

    pub fn handle(&self, peer: PeerAddress) -> Option<PeerHandle> {
        self.index.get(&peer).copied()
    }

    pub fn get(&self, peer: PeerAddress) -> Option<&T> {
        let handle = self.handle(peer)?;
        self.records.get(handle.0).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, peer: PeerAddress) -> Option<&mut T> {
        let handle = self.handle(peer)?;
        self.records.get_mut(handle.0).map(|(_, v)| v)
    }

    /// Record for `peer`, creating it with `init` on first contact.
    pub fn get_or_insert_with(&mut self, peer: PeerAddress, init: impl FnOnce() -> T) -> &mut T {
        let handle = match self.index.get(&peer) {
            Some(h) => *h,
            None => {
                let h = PeerHandle(self.records.insert((peer, init())));
                self.index.insert(peer, h);
                h
            }
        };
        &mut self.records[handle.0].1
    }

    pub fn contains(&self, peer: PeerAddress) -> bool {
        self.index.contains_key(&peer)
    }

    pub fn remove(&mut self, peer: PeerAddress) -> Option<T> {
        let handle = self.index.remove(&peer)?;
        Some(self.records.remove(handle.0).1)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeerAddress, &T)> {
        self.records.iter().map(|(_, (peer, v))| (*peer, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (PeerAddress, &mut T)> {
        self.records.iter_mut().map(|(_, (peer, v))| (*peer, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazily_creates_once() {
        let mut table: PeerTable<u32> = PeerTable::new();
        *table.get_or_insert_with(PeerAddress(4), || 10) += 1;
        *table.get_or_insert_with(PeerAddress(4), || 99) += 1;
        assert_eq!(table.get(PeerAddress(4)), Some(&12));
        assert_eq!(table.len(), 1);
        assert!(table.get(PeerAddress(5)).is_none());
    }

    #[test]
    fn removed_slot_is_reused_without_aliasing() {
        let mut table: PeerTable<&str> = PeerTable::new();
        table.get_or_insert_with(PeerAddress(1), || "a");
        let h1 = table.handle(PeerAddress(1));
        assert_eq!(table.remove(PeerAddress(1)), Some("a"));
        table.get_or_insert_with(PeerAddress(2), || "b");
        assert_eq!(table.handle(PeerAddress(2)), h1);
        assert!(table.get(PeerAddress(1)).is_none());
        assert_eq!(table.get(PeerAddress(2)), Some(&"b"));
    }
}
