//! Node API integration module
//!
//! This module holds the narrow contracts the sync engine consumes from the node (account
//! lookups, paginated transaction queries, block lookups and push subscriptions) together with
//! the REST and websocket implementations of those contracts.

/// REST client for account, transaction and block queries
mod client;
/// Websocket push channel
mod listener;
/// Service contracts consumed by the sync engine
mod services;
/// Type definitions for node data structures
mod types;

pub use client::HttpApiClient;
pub use listener::WebSocketPushChannel;
pub use services::*;
pub use types::*;
