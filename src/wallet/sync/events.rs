//! Event system for transaction synchronization.
//!
//! Push channel subscriptions deliver raw [`PushEvent`]s. Each one is converted into a
//! [`SyncEvent`] and handed to an [`EventDispatcher`], which calls every registered
//! [`SyncEventHandler`] in registration order. The engine registers its own ledger handler
//! first; callers may add observers behind it.

use crate::api::{PushEvent, Transaction, TransactionGroup};
use crate::wallet::SyncError;

use std::sync::Arc;

/// Events that occur while an account is synchronized
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A transaction was pushed into a group
    TransactionReceived { transaction: Transaction },
    /// A transaction left a group
    TransactionRemoved {
        group: TransactionGroup,
        hash: String,
    },
    /// The node rejected a transaction
    TransactionRejected { hash: String, code: String },
    /// A subscription stream reported an error
    ChannelError { address: String, error: String },
}

/// Trait for handling sync events.
#[async_trait::async_trait]
pub trait SyncEventHandler: Send + Sync {
    /// Handle a sync event.
    async fn handle(&self, event: &SyncEvent) -> Result<(), SyncError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Event dispatcher that manages multiple event handlers.
#[derive(Default, Clone)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn SyncEventHandler>>,
}

impl EventDispatcher {
    /// Create a new, empty event dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new event handler.
    ///
    /// Handlers are called in the order they are registered.
    pub fn register_handler(&mut self, handler: Arc<dyn SyncEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from running.
    /// Returns the number of handlers that failed.
    pub async fn dispatch(&self, event: &SyncEvent) -> usize {
        let mut failures = 0;
        for handler in &self.handlers {
            if let Err(e) = handler.handle(event).await {
                tracing::error!("Handler {} failed to process event: {}", handler.name(), e);
                failures += 1;
            }
        }
        failures
    }
}

/// Convert a push channel event into a sync event.
pub fn convert_push_event(event: PushEvent) -> SyncEvent {
    match event {
        PushEvent::Added(transaction) => SyncEvent::TransactionReceived { transaction },
        PushEvent::Removed { group, hash } => SyncEvent::TransactionRemoved { group, hash },
        PushEvent::Status { hash, code } => SyncEvent::TransactionRejected { hash, code },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct Recorder {
        seen: Arc<Mutex<Vec<SyncEvent>>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl SyncEventHandler for Recorder {
        async fn handle(&self, event: &SyncEvent) -> Result<(), SyncError> {
            self.seen.lock().await.push(event.clone());
            if self.fail {
                return Err(SyncError::ValidationError("rejected".to_string()));
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Recorder"
        }
    }

    fn hash(c: char) -> String {
        std::iter::repeat_n(c, 64).collect()
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_the_others() {
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));

        let mut dispatcher = EventDispatcher::new();
        dispatcher.register_handler(Arc::new(Recorder {
            seen: first.clone(),
            fail: true,
        }));
        dispatcher.register_handler(Arc::new(Recorder {
            seen: second.clone(),
            fail: false,
        }));

        let event = SyncEvent::TransactionRemoved {
            group: TransactionGroup::Unconfirmed,
            hash: hash('A'),
        };
        assert_eq!(dispatcher.dispatch(&event).await, 1);

        assert_eq!(first.lock().await.len(), 1);
        assert_eq!(second.lock().await.as_slice(), &[event]);
    }

    #[test]
    fn push_events_keep_their_hashes() {
        let received = convert_push_event(PushEvent::Added(Transaction::new(
            TransactionGroup::Partial,
            "h1",
        )));
        match received {
            SyncEvent::TransactionReceived { transaction } => {
                assert_eq!(transaction.hash, "h1");
                assert_eq!(transaction.group, TransactionGroup::Partial);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        assert_eq!(
            convert_push_event(PushEvent::Status {
                hash: hash('f'),
                code: "Failure_Core_Past_Deadline".to_string(),
            }),
            SyncEvent::TransactionRejected {
                hash: hash('f'),
                code: "Failure_Core_Past_Deadline".to_string(),
            }
        );
        assert_eq!(
            convert_push_event(PushEvent::Removed {
                group: TransactionGroup::Unconfirmed,
                hash: "H2".to_string(),
            }),
            SyncEvent::TransactionRemoved {
                group: TransactionGroup::Unconfirmed,
                hash: "H2".to_string(),
            }
        );
    }
}
