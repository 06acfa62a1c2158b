//! Counters for a sync session.
//!
//! The engine records every merge decision and every fetch outcome here. The summary is logged
//! when a session is torn down and the counters start over with the next session.

use serde::Serialize;
use tracing::info;

/// Statistics about a sync session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Pages fetched from the node
    pub pages_fetched: u64,
    /// Pages served from the query cache
    pub cache_hits: u64,
    /// Transactions that entered the ledger
    pub transactions_added: u64,
    /// Transactions dropped by the dedup gate
    pub duplicates_dropped: u64,
    /// Transactions moved to a later lifecycle group
    pub promotions: u64,
    /// Transactions removed from a group
    pub removals: u64,
    /// Fetch results or push events that arrived after their session ended
    pub stale_discarded: u64,
    /// Push events handled
    pub push_events: u64,
    /// Failed node requests
    pub transport_failures: u64,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a human-readable summary of the sync statistics
    pub fn summary(&self) -> String {
        format!(
            "{} pages fetched ({} cached), {} transactions added, {} duplicates, {} promoted, {} removed, {} push events{}{}",
            self.pages_fetched,
            self.cache_hits,
            self.transactions_added,
            self.duplicates_dropped,
            self.promotions,
            self.removals,
            self.push_events,
            if self.stale_discarded == 0 {
                String::new()
            } else {
                format!(", {} stale discarded", self.stale_discarded)
            },
            if self.transport_failures == 0 {
                String::new()
            } else {
                format!(", {} transport failures", self.transport_failures)
            }
        )
    }

    /// Log the summary and start over.
    pub fn finish(&mut self, address: &str) -> SyncStats {
        info!("Sync session for {} finished: {}", address, self.summary());
        std::mem::take(self)
    }
}
