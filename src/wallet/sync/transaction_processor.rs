use crate::api::{Transaction, TransactionGroup};
use crate::wallet::SyncError;

use itertools::Itertools;
use std::collections::HashSet;
use tracing::debug;

/// Length of a transaction hash in hex characters, enforced only in strict mode.
pub const HASH_HEX_LEN: usize = 64;

/// Prepares transactions for the dedup gate.
///
/// Hashes are opaque identifiers and are never rewritten. Gateways that only ever issue
/// 64 character hex hashes can opt into `strict_hashes`, which makes locally submitted
/// transactions with any other hash a validation error.
#[derive(Clone, Debug, Default)]
pub struct TransactionProcessor {
	strict_hashes: bool,
}

impl TransactionProcessor {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_strict_hashes(strict_hashes: bool) -> Self {
		Self { strict_hashes }
	}

	pub fn is_strict(&self) -> bool {
		self.strict_hashes
	}

	/// Check a locally submitted hash against the gateway's hash format
	pub fn check_hash(&self, hash: &str) -> Result<(), SyncError> {
		if !self.strict_hashes {
			return Ok(());
		}

		if hash.len() != HASH_HEX_LEN {
			return Err(SyncError::ValidationError(format!(
				"Transaction hash {:?} must be {} hex characters",
				hash, HASH_HEX_LEN
			)));
		}
		hex::decode(hash).map_err(|e| {
			SyncError::ValidationError(format!("Transaction hash {:?} is not hex: {}", hash, e))
		})?;
		Ok(())
	}

	/// Tag a transaction with the group it is merged into
	pub fn process_transaction(
		&self,
		group: TransactionGroup,
		mut transaction: Transaction,
	) -> Transaction {
		transaction.group = group;
		transaction
	}

	/// Batch process a fetched page. Records keep their order and their hashes.
	pub fn process_page(
		&self,
		group: TransactionGroup,
		transactions: Vec<Transaction>,
	) -> Vec<Transaction> {
		let retagged = transactions.iter().filter(|tx| tx.group != group).count();
		if retagged > 0 {
			debug!("Retagged {} records as {}", retagged, group);
		}

		transactions
			.into_iter()
			.map(|tx| self.process_transaction(group, tx))
			.collect()
	}

	/// Block heights referenced by a page, unique, in page order, skipping `already_requested`
	pub fn referenced_heights(
		&self,
		transactions: &[Transaction],
		already_requested: &HashSet<u64>,
	) -> Vec<u64> {
		transactions
			.iter()
			.filter_map(|tx| tx.height)
			.filter(|height| !already_requested.contains(height))
			.unique()
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn hash(c: char) -> String {
		std::iter::repeat_n(c, HASH_HEX_LEN).collect()
	}

	#[test]
	fn any_hash_passes_by_default() {
		let processor = TransactionProcessor::new();
		assert!(!processor.is_strict());
		assert!(processor.check_hash("H1").is_ok());
		assert!(processor.check_hash("").is_ok());
	}

	#[test]
	fn strict_mode_rejects_non_hex_hashes() {
		let processor = TransactionProcessor::with_strict_hashes(true);
		assert!(processor.check_hash(&hash('a')).is_ok());
		assert!(processor.check_hash(&hash('A')).is_ok());
		assert!(processor.check_hash("ABCD").is_err());
		assert!(processor.check_hash(&hash('z')).is_err());
		assert!(processor.check_hash("").is_err());
	}

	#[test]
	fn page_processing_keeps_records_and_hashes() {
		let processor = TransactionProcessor::new();
		let page = vec![
			Transaction::new(TransactionGroup::Partial, "H1"),
			Transaction::new(TransactionGroup::Partial, "not-a-hash"),
			Transaction::new(TransactionGroup::Partial, hash('c')),
		];

		let processed = processor.process_page(TransactionGroup::Confirmed, page);
		assert_eq!(processed.len(), 3);
		assert_eq!(processed[0].hash, "H1");
		assert_eq!(processed[2].hash, hash('c'));
		assert!(processed.iter().all(|tx| tx.group == TransactionGroup::Confirmed));
	}

	#[test]
	fn referenced_heights_are_unique_and_skip_known() {
		let processor = TransactionProcessor::new();
		let page = vec![
			Transaction::new(TransactionGroup::Confirmed, "H1").with_height(12),
			Transaction::new(TransactionGroup::Confirmed, "H2").with_height(10),
			Transaction::new(TransactionGroup::Confirmed, "H3").with_height(12),
			Transaction::new(TransactionGroup::Confirmed, "H4"),
			Transaction::new(TransactionGroup::Confirmed, "H5").with_height(7),
		];

		let known: HashSet<u64> = [7].into_iter().collect();
		assert_eq!(processor.referenced_heights(&page, &known), vec![12, 10]);
	}
}
