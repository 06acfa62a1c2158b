//! Transaction Synchronization Module
//!
//! This module provides the core logic for keeping an account's transactions in sync with the
//! node. It is composed of several submodules, each responsible for one aspect of the sync
//! process:
//!
//! - `engine`: The main entry point. It wires together all services and owns the session state.
//! - `ledger` and `hash_index`: Per-group transaction lists behind a global dedup gate.
//! - `query_cache`: Memoizes page results by query fingerprint.
//! - `subscriptions`: Live push subscriptions of the active session.
//! - `init_lock`: Serializes initialize and uninitialize sequences.
//! - `events`: Event types and handler traits used to route pushed events.
//! - `transaction_processor`: Validation and normalization of incoming transactions.
//! - `stats`: Counters for a sync session.

/// Main coordinator for the transaction sync process
pub mod engine;
/// Event system for routing pushed events
pub mod events;
/// Global hash set used as the dedup gate
pub mod hash_index;
/// Serialization of lifecycle operations
pub mod init_lock;
/// Per-group transaction lists
pub mod ledger;
/// Page memoization
pub mod query_cache;
/// Session counters
pub mod stats;
/// Push subscriptions of the active session
pub mod subscriptions;
/// Transaction validation service
pub mod transaction_processor;

pub use engine::*;
