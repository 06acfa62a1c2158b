use super::types::{AccountInfo, ApiError, PageQuery, PushEvent, Topic, Transaction};

use futures_util::Stream;
use std::pin::Pin;

/// Stream of events for one topic subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<PushEvent, ApiError>> + Send>>;

/// Account lookups and paginated transaction queries.
#[async_trait::async_trait]
pub trait AccountService: Send + Sync {
	async fn get_info(&self, address: &str) -> Result<AccountInfo, ApiError>;

	/// Fetch one page of transactions, newest first.
	async fn get_transactions(&self, query: &PageQuery) -> Result<Vec<Transaction>, ApiError>;
}

/// Block lookups. Results are not consumed by the engine.
#[async_trait::async_trait]
pub trait BlockService: Send + Sync {
	async fn fetch_blocks(&self, heights: &[u64]) -> Result<(), ApiError>;
}

/// Factory for push listeners.
#[async_trait::async_trait]
pub trait PushChannel: Send + Sync {
	/// Open a live channel for the given address.
	async fn open(&self, address: &str) -> Result<Box<dyn Listener>, ApiError>;
}

/// A live push channel bound to one address.
///
/// Every `subscribe` call creates a sub-subscription whose stream ends once the topic is
/// unsubscribed or the listener is closed.
#[async_trait::async_trait]
pub trait Listener: Send {
	fn address(&self) -> &str;

	fn is_open(&self) -> bool;

	async fn subscribe(&mut self, topic: Topic) -> Result<EventStream, ApiError>;

	async fn unsubscribe(&mut self, topic: Topic) -> Result<(), ApiError>;

	/// Close the channel. Closing an already closed listener succeeds.
	async fn close(&mut self) -> Result<(), ApiError>;
}
