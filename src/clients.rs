//! Associated station tracking

use crate::mac::MacAddress;
use std::collections::HashSet;

/// Set of stations currently associated with the AP.
///
/// Insertion order is kept for reporting only; equality of snapshots is
/// decided on the set of addresses.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: Vec<MacAddress>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set. Returns true if the visible set changed.
    pub fn replace(&mut self, snapshot: &[MacAddress]) -> bool {
        let mut seen = HashSet::with_capacity(snapshot.len());
        let deduped: Vec<MacAddress> = snapshot
            .iter()
            .copied()
            .filter(|mac| seen.insert(*mac))
            .collect();

        let current: HashSet<MacAddress> = self.clients.iter().copied().collect();
        if current == seen {
            return false;
        }

        self.clients = deduped;
        true
    }

    /// Add one station. Returns false if it was already present.
    pub fn insert(&mut self, mac: MacAddress) -> bool {
        if self.clients.contains(&mac) {
            return false;
        }
        self.clients.push(mac);
        true
    }

    /// Remove one station. Returns false if it was not present.
    pub fn remove(&mut self, mac: &MacAddress) -> bool {
        let before = self.clients.len();
        self.clients.retain(|c| c != mac);
        self.clients.len() != before
    }

    /// Drop every station. Returns true if the set was non-empty.
    pub fn clear(&mut self) -> bool {
        self.replace(&[])
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn contains(&self, mac: &MacAddress) -> bool {
        self.clients.contains(mac)
    }

    pub fn snapshot(&self) -> Vec<MacAddress> {
        self.clients.clone()
    }
}
