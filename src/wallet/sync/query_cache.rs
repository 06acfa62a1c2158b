//! Page cache keyed by query shape.
//!
//! Entries are written once per fingerprint and served as-is until the whole cache is cleared
//! on session reset; pushed transactions never invalidate a cached page.

use crate::api::{PageQuery, Transaction, TransactionGroup};

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Deterministic cache key for a [`PageQuery`].
///
/// The key is the JSON encoding of the `(group, address, page_size, continuation_id)` tuple,
/// which is injective over the tuple, so distinct queries never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QueryFingerprint(String);

impl QueryFingerprint {
    pub fn new(
        group: TransactionGroup,
        address: &str,
        page_size: u32,
        continuation_id: Option<&str>,
    ) -> Self {
        let key = serde_json::json!([group.as_str(), address, page_size, continuation_id]);
        Self(key.to_string())
    }

    pub fn of(query: &PageQuery) -> Self {
        Self::new(
            query.group,
            &query.address,
            query.page_size,
            query.continuation_id.as_deref(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: usize,
}

#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<QueryFingerprint, Vec<Transaction>>,
    hits: u64,
    misses: u64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a page, counting the hit or miss.
    pub fn get(&mut self, key: &QueryFingerprint) -> Option<Vec<Transaction>> {
        match self.entries.get(key) {
            Some(page) => {
                self.hits += 1;
                Some(page.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn contains(&self, key: &QueryFingerprint) -> bool {
        self.entries.contains_key(key)
    }

    /// Store a page, replacing whatever was cached for the key.
    pub fn put(&mut self, key: QueryFingerprint, page: Vec<Transaction>) {
        self.entries.insert(key, page);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached pages sorted by key.
    pub fn entries(&self) -> Vec<(QueryFingerprint, Vec<Transaction>)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(key, page)| (key.clone(), page.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn stats(&self) -> QueryCacheStats {
        QueryCacheStats {
            hits: self.hits,
            misses: self.misses,
            entry_count: self.entries.len(),
        }
    }
}
