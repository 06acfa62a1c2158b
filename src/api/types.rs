//! Types shared between the REST client, the push channel and the sync engine

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle group a transaction currently belongs to.
///
/// A transaction moves forward through the groups as the network picks it up:
/// `Partial` (waiting for cosignatures) -> `Unconfirmed` (in the mempool) -> `Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionGroup {
	Partial,
	Unconfirmed,
	Confirmed,
}

impl TransactionGroup {
	/// All groups in display precedence order.
	pub const ALL: [TransactionGroup; 3] = [
		TransactionGroup::Partial,
		TransactionGroup::Unconfirmed,
		TransactionGroup::Confirmed,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			TransactionGroup::Partial => "partial",
			TransactionGroup::Unconfirmed => "unconfirmed",
			TransactionGroup::Confirmed => "confirmed",
		}
	}

	/// Lenient conversion used on the fetch path: anything that is not an exact group name
	/// (including an empty tag) falls back to `Confirmed`.
	pub fn from_tag(tag: &str) -> Self {
		tag.parse().unwrap_or(TransactionGroup::Confirmed)
	}

	/// Position in the partial -> unconfirmed -> confirmed lifecycle.
	pub fn stage(&self) -> u8 {
		match self {
			TransactionGroup::Partial => 0,
			TransactionGroup::Unconfirmed => 1,
			TransactionGroup::Confirmed => 2,
		}
	}
}

impl FromStr for TransactionGroup {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"partial" => Ok(TransactionGroup::Partial),
			"unconfirmed" => Ok(TransactionGroup::Unconfirmed),
			"confirmed" => Ok(TransactionGroup::Confirmed),
			other => Err(format!("unknown transaction group: {:?}", other)),
		}
	}
}

impl fmt::Display for TransactionGroup {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A transaction as tracked by the sync engine.
///
/// The payload is kept opaque; the engine only ever looks at the hash, the group, the record id
/// (used as a pagination cursor) and the block height (confirmed transactions only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
	/// Transaction hash, an opaque identifier kept exactly as the node reported it.
	pub hash: String,
	/// Group the transaction was observed in.
	pub group: TransactionGroup,
	/// Server-side record id, usable as a continuation id for the next page.
	pub id: Option<String>,
	/// Block height, set for confirmed transactions.
	pub height: Option<u64>,
	/// Raw transaction body as delivered by the node.
	pub payload: serde_json::Value,
}

impl Transaction {
	pub fn new(group: TransactionGroup, hash: impl Into<String>) -> Self {
		Self {
			hash: hash.into(),
			group,
			id: None,
			height: None,
			payload: serde_json::Value::Null,
		}
	}

	pub fn with_id(mut self, id: impl Into<String>) -> Self {
		self.id = Some(id.into());
		self
	}

	pub fn with_height(mut self, height: u64) -> Self {
		self.height = Some(height);
		self
	}

	pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
		self.payload = payload;
		self
	}
}

/// Account state returned by the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
	pub address: String,
	/// Height at which the node first saw the address.
	#[serde(rename = "addressHeight", default, deserialize_with = "deserialize_lenient_u64")]
	pub address_height: Option<u64>,
	/// Public key, `None` while the account has never announced one.
	#[serde(rename = "publicKey", default)]
	pub public_key: Option<String>,
	/// Balances, kept opaque.
	#[serde(default)]
	pub mosaics: Vec<serde_json::Value>,
}

impl AccountInfo {
	/// The node reports unknown public keys as all zeroes.
	pub fn normalized(mut self) -> Self {
		if self
			.public_key
			.as_deref()
			.is_some_and(|key| key.chars().all(|c| c == '0'))
		{
			self.public_key = None;
		}
		self
	}
}

/// The shape of a paginated transaction query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageQuery {
	pub group: TransactionGroup,
	pub address: String,
	pub page_size: u32,
	/// Cursor of the last record of the previous page; `None` requests the first page.
	pub continuation_id: Option<String>,
}

impl PageQuery {
	pub fn new(
		group: TransactionGroup,
		address: impl Into<String>,
		page_size: u32,
		continuation_id: Option<String>,
	) -> Self {
		Self {
			group,
			address: address.into(),
			page_size,
			continuation_id,
		}
	}

	/// Query for the first page of a group.
	pub fn first_page(group: TransactionGroup, address: impl Into<String>, page_size: u32) -> Self {
		Self::new(group, address, page_size, None)
	}
}

/// Push topics a listener can subscribe to for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
	#[serde(rename = "confirmedAdded")]
	ConfirmedAdded,
	#[serde(rename = "unconfirmedAdded")]
	UnconfirmedAdded,
	#[serde(rename = "unconfirmedRemoved")]
	UnconfirmedRemoved,
	#[serde(rename = "partialAdded")]
	PartialAdded,
	#[serde(rename = "partialRemoved")]
	PartialRemoved,
	#[serde(rename = "status")]
	Status,
}

impl Topic {
	pub const ALL: [Topic; 6] = [
		Topic::ConfirmedAdded,
		Topic::UnconfirmedAdded,
		Topic::UnconfirmedRemoved,
		Topic::PartialAdded,
		Topic::PartialRemoved,
		Topic::Status,
	];

	pub fn channel_name(&self) -> &'static str {
		match self {
			Topic::ConfirmedAdded => "confirmedAdded",
			Topic::UnconfirmedAdded => "unconfirmedAdded",
			Topic::UnconfirmedRemoved => "unconfirmedRemoved",
			Topic::PartialAdded => "partialAdded",
			Topic::PartialRemoved => "partialRemoved",
			Topic::Status => "status",
		}
	}

	pub fn from_channel_name(name: &str) -> Option<Self> {
		Topic::ALL
			.into_iter()
			.find(|topic| topic.channel_name() == name)
	}

	/// Group the topic reports on; `Status` spans groups.
	pub fn group(&self) -> Option<TransactionGroup> {
		match self {
			Topic::ConfirmedAdded => Some(TransactionGroup::Confirmed),
			Topic::UnconfirmedAdded | Topic::UnconfirmedRemoved => {
				Some(TransactionGroup::Unconfirmed)
			}
			Topic::PartialAdded | Topic::PartialRemoved => Some(TransactionGroup::Partial),
			Topic::Status => None,
		}
	}

	/// Full channel path for an address, e.g. `confirmedAdded/TADDR...`.
	pub fn channel_for(&self, address: &str) -> String {
		format!("{}/{}", self.channel_name(), address)
	}
}

impl fmt::Display for Topic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.channel_name())
	}
}

/// Events delivered by a push channel subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
	/// A transaction entered a group.
	Added(Transaction),
	/// A transaction left a group.
	Removed {
		group: TransactionGroup,
		hash: String,
	},
	/// The node rejected a transaction.
	Status { hash: String, code: String },
}

/// Transaction record as serialized by the node REST and websocket APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionDto {
	/// Record id (newer node versions put it at the top level).
	#[serde(default)]
	pub id: Option<String>,
	#[serde(default)]
	pub meta: TransactionMeta,
	#[serde(default)]
	pub transaction: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionMeta {
	#[serde(default)]
	pub hash: Option<String>,
	#[serde(default, deserialize_with = "deserialize_lenient_u64")]
	pub height: Option<u64>,
	#[serde(default)]
	pub id: Option<String>,
}

impl TransactionDto {
	pub fn into_transaction(self, group: TransactionGroup) -> Result<Transaction, ApiError> {
		let hash = self.meta.hash.ok_or_else(|| {
			ApiError::InvalidPayload("transaction record without meta.hash".to_string())
		})?;

		Ok(Transaction {
			hash,
			group,
			id: self.id.or(self.meta.id),
			height: self.meta.height,
			payload: self.transaction,
		})
	}
}

/// Hash-only record delivered on the `*Removed` topics.
#[derive(Debug, Clone, Deserialize)]
pub struct RemovedDto {
	pub meta: RemovedMeta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemovedMeta {
	pub hash: String,
}

/// Rejection notice delivered on the `status` topic.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusDto {
	pub hash: String,
	pub code: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
	Number(u64),
	String(String),
}

/// The node encodes 64-bit integers as decimal strings; older versions use plain numbers.
fn deserialize_lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
	D: Deserializer<'de>,
{
	match Option::<NumberOrString>::deserialize(deserializer)? {
		None => Ok(None),
		Some(NumberOrString::Number(value)) => Ok(Some(value)),
		Some(NumberOrString::String(value)) => value
			.parse()
			.map(Some)
			.map_err(serde::de::Error::custom),
	}
}

/// Error types for the node REST and websocket collaborators
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("WebSocket error: {0}")]
	WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("Unexpected status {status}: {body}")]
	StatusError { status: u16, body: String },

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Invalid payload: {0}")]
	InvalidPayload(String),

	#[error("No data returned")]
	NoData,

	#[error("Channel error: {0}")]
	ChannelError(String),
}
