//! Dedup gate for transaction hashes.
//!
//! The index remembers every hash currently held by the ledger, in the order it was first
//! seen. A hash is present at most once; removal compacts the order immediately.

use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct HashIndex {
    /// Hashes in insertion order
    order: Vec<String>,
    /// Membership lookup
    members: HashSet<String>,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.members.contains(hash)
    }

    /// Insert a hash. Returns `false` when it was already present.
    pub fn insert(&mut self, hash: &str) -> bool {
        if !self.members.insert(hash.to_string()) {
            return false;
        }
        self.order.push(hash.to_string());
        true
    }

    /// Remove a hash. Returns `false` when it was absent.
    pub fn remove(&mut self, hash: &str) -> bool {
        if !self.members.remove(hash) {
            return false;
        }
        self.order.retain(|known| known != hash);
        true
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Hashes in the order they were first inserted.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}
