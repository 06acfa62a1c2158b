//! Live, deduplicated transaction set of the active account.
//!
//! The ledger keeps one ordered sequence per [`TransactionGroup`] and shares a single
//! [`HashIndex`] across them, so a hash can only ever live in one group. Moving a transaction
//! between groups is a `remove` followed by an `add`.

use crate::api::{Transaction, TransactionGroup};
use crate::wallet::SyncError;
use crate::wallet::sync::hash_index::HashIndex;

use serde::Serialize;
use std::collections::HashSet;

/// Result of [`TransactionLedger::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// The hash is already known; nothing changed.
    Duplicate,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionLedger {
    index: HashIndex,
    partial: Vec<Transaction>,
    unconfirmed: Vec<Transaction>,
    confirmed: Vec<Transaction>,
}

/// Point-in-time copy of the three groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerSnapshot {
    pub partial: Vec<Transaction>,
    pub unconfirmed: Vec<Transaction>,
    pub confirmed: Vec<Transaction>,
}

impl LedgerSnapshot {
    pub fn len(&self) -> usize {
        self.partial.len() + self.unconfirmed.len() + self.confirmed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn sequence(&self, group: TransactionGroup) -> &Vec<Transaction> {
        match group {
            TransactionGroup::Partial => &self.partial,
            TransactionGroup::Unconfirmed => &self.unconfirmed,
            TransactionGroup::Confirmed => &self.confirmed,
        }
    }

    fn sequence_mut(&mut self, group: TransactionGroup) -> &mut Vec<Transaction> {
        match group {
            TransactionGroup::Partial => &mut self.partial,
            TransactionGroup::Unconfirmed => &mut self.unconfirmed,
            TransactionGroup::Confirmed => &mut self.confirmed,
        }
    }

    /// Append a transaction to `group` unless its hash is already known.
    ///
    /// The stored copy is re-tagged with `group`.
    pub fn add(&mut self, group: TransactionGroup, mut transaction: Transaction) -> AddOutcome {
        if !self.index.insert(&transaction.hash) {
            return AddOutcome::Duplicate;
        }

        transaction.group = group;
        self.sequence_mut(group).push(transaction);

        debug_assert!(self.check_invariants().is_ok());
        AddOutcome::Added
    }

    /// Remove the transaction with `hash` from `group`, compacting the sequence.
    pub fn remove(&mut self, group: TransactionGroup, hash: &str) -> Option<Transaction> {
        let sequence = self.sequence_mut(group);
        let position = sequence.iter().position(|tx| tx.hash == hash)?;
        let removed = sequence.remove(position);
        self.index.remove(hash);

        debug_assert!(self.check_invariants().is_ok());
        Some(removed)
    }

    /// Clear all groups together with every hash they registered.
    pub fn reset_all(&mut self) {
        for group in TransactionGroup::ALL {
            let hashes: Vec<String> = self
                .sequence(group)
                .iter()
                .map(|tx| tx.hash.clone())
                .collect();
            for hash in hashes {
                self.index.remove(&hash);
            }
            self.sequence_mut(group).clear();
        }

        debug_assert!(self.check_invariants().is_ok());
    }

    /// Group currently holding `hash`.
    pub fn group_of(&self, hash: &str) -> Option<TransactionGroup> {
        if !self.index.contains(hash) {
            return None;
        }
        TransactionGroup::ALL
            .into_iter()
            .find(|group| self.sequence(*group).iter().any(|tx| tx.hash == hash))
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.index.contains(hash)
    }

    pub fn group(&self, group: TransactionGroup) -> &[Transaction] {
        self.sequence(group)
    }

    /// Partial, then unconfirmed, then confirmed transactions.
    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.partial
            .iter()
            .chain(self.unconfirmed.iter())
            .chain(self.confirmed.iter())
    }

    /// Owned copy of [`Self::iter`].
    pub fn all_transactions(&self) -> Vec<Transaction> {
        self.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            partial: self.partial.clone(),
            unconfirmed: self.unconfirmed.clone(),
            confirmed: self.confirmed.clone(),
        }
    }

    pub fn hash_index(&self) -> &HashIndex {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.partial.len() + self.unconfirmed.len() + self.confirmed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored hash is indexed, and no hash is stored twice.
    pub fn check_invariants(&self) -> Result<(), SyncError> {
        let mut seen = HashSet::new();
        for tx in self.iter() {
            if !self.index.contains(&tx.hash) {
                return Err(SyncError::InvariantViolation(format!(
                    "{} transaction {} is missing from the hash index",
                    tx.group, tx.hash
                )));
            }
            if !seen.insert(tx.hash.as_str()) {
                return Err(SyncError::InvariantViolation(format!(
                    "transaction {} is stored more than once",
                    tx.hash
                )));
            }
        }
        Ok(())
    }
}
