//! Push subscriptions of the active session.
//!
//! A [`SubscriptionHandle`] owns one live listener plus a forwarding task per subscribed topic.
//! Forwarders convert pushed events and hand them to the session's [`EventDispatcher`].
//! Teardown unsubscribes every topic before the listener is closed, so a reconnect triggered
//! by the close cannot re-deliver events, and one failing handle never stops the others from
//! being closed.

use crate::api::{EventStream, Listener, PushChannel, Topic};
use crate::wallet::SyncError;
use crate::wallet::sync::events::{EventDispatcher, SyncEvent, convert_push_event};

use futures_util::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One topic subscription and the task forwarding its events.
struct TopicSubscription {
	topic: Topic,
	forwarder: JoinHandle<()>,
}

/// A live listener for one address together with its topic subscriptions
pub struct SubscriptionHandle {
	address: String,
	epoch: u64,
	listener: Box<dyn Listener>,
	subscriptions: Vec<TopicSubscription>,
	closed: bool,
}

impl SubscriptionHandle {
	fn new(address: &str, epoch: u64, listener: Box<dyn Listener>) -> Self {
		Self {
			address: address.to_string(),
			epoch,
			listener,
			subscriptions: Vec::new(),
			closed: false,
		}
	}

	pub fn address(&self) -> &str {
		&self.address
	}

	/// Session epoch the handle was opened in.
	pub fn epoch(&self) -> u64 {
		self.epoch
	}

	pub fn topics(&self) -> Vec<Topic> {
		self.subscriptions.iter().map(|sub| sub.topic).collect()
	}

	pub fn is_closed(&self) -> bool {
		self.closed
	}

	/// Unsubscribe every topic, then close the listener.
	///
	/// Every step is attempted even when an earlier one fails. Closing twice is a no-op.
	pub async fn close(&mut self) -> Result<(), SyncError> {
		if self.closed {
			return Ok(());
		}
		self.closed = true;

		let mut failures = Vec::new();
		for subscription in self.subscriptions.drain(..) {
			if let Err(e) = self.listener.unsubscribe(subscription.topic).await {
				warn!(
					"Failed to unsubscribe {} for {}: {}",
					subscription.topic, self.address, e
				);
				failures.push(format!("unsubscribe {}: {}", subscription.topic, e));
			}
			subscription.forwarder.abort();
		}

		if let Err(e) = self.listener.close().await {
			warn!("Failed to close push channel for {}: {}", self.address, e);
			failures.push(format!("close: {}", e));
		}

		if failures.is_empty() {
			debug!("Closed subscriptions for {}", self.address);
			Ok(())
		} else {
			Err(SyncError::SubscriptionError(format!(
				"{}: {}",
				self.address,
				failures.join("; ")
			)))
		}
	}
}

impl Drop for SubscriptionHandle {
	fn drop(&mut self) {
		for subscription in &self.subscriptions {
			subscription.forwarder.abort();
		}
	}
}

/// Outcome of [`SubscriptionRegistry::close_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseReport {
	/// Handles torn down
	pub closed: usize,
	/// Handles whose teardown reported at least one failure
	pub failed: usize,
}

/// Registry of the live subscription handles
#[derive(Default)]
pub struct SubscriptionRegistry {
	handles: Vec<SubscriptionHandle>,
}

impl SubscriptionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Open a listener for `address`, subscribe every topic and register the handle.
	///
	/// Returns the registered handle. If any topic fails to subscribe, the partially opened
	/// handle is closed again and the error is returned; nothing is registered.
	pub async fn open(
		&mut self,
		channel: &dyn PushChannel,
		address: &str,
		topics: &[Topic],
		epoch: u64,
		dispatcher: EventDispatcher,
	) -> Result<&SubscriptionHandle, SyncError> {
		let listener = channel.open(address).await?;
		let mut handle = SubscriptionHandle::new(address, epoch, listener);
		let dispatcher = Arc::new(dispatcher);

		for topic in topics {
			match handle.listener.subscribe(*topic).await {
				Ok(stream) => {
					let forwarder = spawn_forwarder(
						address.to_string(),
						*topic,
						stream,
						dispatcher.clone(),
					);
					handle.subscriptions.push(TopicSubscription {
						topic: *topic,
						forwarder,
					});
				}
				Err(e) => {
					error!("Failed to subscribe {} for {}: {}", topic, address, e);
					if let Err(close_error) = handle.close().await {
						warn!("Cleanup after failed subscribe: {}", close_error);
					}
					return Err(e.into());
				}
			}
		}

		info!(
			"Subscribed {} topics for {} (epoch {})",
			handle.subscriptions.len(),
			address,
			epoch
		);
		let index = self.handles.len();
		self.handles.push(handle);
		Ok(&self.handles[index])
	}

	/// Tear down every registered handle and empty the registry.
	pub async fn close_all(&mut self) -> CloseReport {
		let mut report = CloseReport::default();

		for mut handle in self.handles.drain(..) {
			if let Err(e) = handle.close().await {
				error!("Subscription teardown incomplete: {}", e);
				report.failed += 1;
			}
			report.closed += 1;
		}

		if report.closed > 0 {
			info!(
				"Closed {} subscription handles ({} with failures)",
				report.closed, report.failed
			);
		}
		report
	}

	pub fn handles(&self) -> &[SubscriptionHandle] {
		&self.handles
	}

	pub fn addresses(&self) -> Vec<String> {
		self.handles
			.iter()
			.map(|handle| handle.address.clone())
			.collect()
	}

	pub fn len(&self) -> usize {
		self.handles.len()
	}

	pub fn is_empty(&self) -> bool {
		self.handles.is_empty()
	}
}

fn spawn_forwarder(
	address: String,
	topic: Topic,
	mut stream: EventStream,
	dispatcher: Arc<EventDispatcher>,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		while let Some(item) = stream.next().await {
			let event = match item {
				Ok(push_event) => convert_push_event(push_event),
				Err(e) => {
					error!("Error in {} subscription for {}: {}", topic, address, e);
					SyncEvent::ChannelError {
						address: address.clone(),
						error: e.to_string(),
					}
				}
			};

			dispatcher.dispatch(&event).await;
		}
		debug!("{} subscription for {} ended", topic, address);
	})
}
