use crate::api::ApiError;

/// Error types for the transaction sync engine
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	/// The node or push channel failed. Callers may retry.
	#[error("Api error: {0}")]
	ApiError(#[from] ApiError),

	#[error("Validation error: {0}")]
	ValidationError(String),

	/// Internal bookkeeping is inconsistent. Always a defect.
	#[error("Invariant violation: {0}")]
	InvariantViolation(String),

	#[error("Subscription error: {0}")]
	SubscriptionError(String),

	#[error("Config error: {0}")]
	ConfigError(String),

	#[error("Task error: {0}")]
	TaskError(String),
}

impl SyncError {
	/// Whether the failure came from the node transport rather than from the engine itself.
	pub fn is_transport(&self) -> bool {
		matches!(self, SyncError::ApiError(_) | SyncError::SubscriptionError(_))
	}
}
