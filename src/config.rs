use crate::api::Topic;
use crate::wallet::SyncError;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a sync engine session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
	/// Base URL of the node REST gateway
	pub rest_url: String,
	/// Websocket URL of the node
	pub ws_url: String,
	/// Page size used for the first pages fetched during initialization
	pub page_size: u32,
	/// Timeout applied to every REST request
	pub request_timeout: Duration,
	/// Time budget the REST client may spend retrying transient failures
	pub retry_max_elapsed: Duration,
	/// Push topics opened for the active address
	pub topics: Vec<Topic>,
	/// Whether confirmed pages trigger a lookup of the blocks they reference
	pub fetch_block_heights: bool,
	/// Reject submitted transactions whose hash is not 64 hex characters. Only for gateways
	/// known to issue such hashes; fetched and pushed records are never checked.
	pub strict_hashes: bool,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			rest_url: "http://localhost:3000".to_string(),
			ws_url: "ws://localhost:3000/ws".to_string(),
			page_size: 10,
			request_timeout: Duration::from_secs(30),
			retry_max_elapsed: Duration::from_secs(10),
			topics: Topic::ALL.to_vec(),
			fetch_block_heights: true,
			strict_hashes: false,
		}
	}
}

impl EngineConfig {
	/// Defaults overlaid with `WALLET_SYNC_*` environment variables.
	pub fn from_env() -> Result<Self, SyncError> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SyncError> {
		let mut config = Self::default();

		if let Some(url) = lookup("WALLET_SYNC_REST_URL") {
			config.rest_url = url;
		}
		if let Some(url) = lookup("WALLET_SYNC_WS_URL") {
			config.ws_url = url;
		}
		if let Some(size) = lookup("WALLET_SYNC_PAGE_SIZE") {
			config.page_size = size.parse().map_err(|e| {
				SyncError::ConfigError(format!("Invalid WALLET_SYNC_PAGE_SIZE {:?}: {}", size, e))
			})?;
		}
		if let Some(secs) = lookup("WALLET_SYNC_REQUEST_TIMEOUT_SECS") {
			let secs: u64 = secs.parse().map_err(|e| {
				SyncError::ConfigError(format!(
					"Invalid WALLET_SYNC_REQUEST_TIMEOUT_SECS {:?}: {}",
					secs, e
				))
			})?;
			config.request_timeout = Duration::from_secs(secs);
		}
		if let Some(strict) = lookup("WALLET_SYNC_STRICT_HASHES") {
			config.strict_hashes = strict.parse().map_err(|e| {
				SyncError::ConfigError(format!(
					"Invalid WALLET_SYNC_STRICT_HASHES {:?}: {}",
					strict, e
				))
			})?;
		}

		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), SyncError> {
		if self.rest_url.trim().is_empty() {
			return Err(SyncError::ConfigError("rest_url is empty".to_string()));
		}
		if self.ws_url.trim().is_empty() {
			return Err(SyncError::ConfigError("ws_url is empty".to_string()));
		}
		if self.page_size == 0 {
			return Err(SyncError::ConfigError("page_size must be positive".to_string()));
		}
		Ok(())
	}
}
