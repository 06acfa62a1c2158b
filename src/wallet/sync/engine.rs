//! Transaction sync engine and integration point for all sync components.
//!
//! This module defines the [`SyncEngine`], which owns every piece of per-session state: the
//! [`TransactionLedger`] with its hash index, the [`QueryCache`], the
//! [`SubscriptionRegistry`] and the [`InitializationLock`]. One engine is constructed per wallet
//! session and shared by handle; it never lives in a global.
//!
//! The engine is responsible for:
//! - Running initialize / uninitialize / account switches strictly one after another
//! - Fetching pages through the query cache and merging them into the ledger
//! - Routing pushed events through the same merge path as fetched pages
//! - Discarding late fetch results and pushes that belong to a session that has ended
//!
//! Every fetch and every push forwarder is tagged with the session epoch it started in. Each
//! initialize and teardown bumps the epoch, so a result that completes after the active account
//! changed is returned to its caller but never merged.

use crate::api::{
	AccountInfo, AccountService, ApiError, BlockService, HttpApiClient, PageQuery, PushChannel,
	Transaction, TransactionGroup, WebSocketPushChannel,
};
use crate::config::EngineConfig;
use crate::wallet::SyncError;
use crate::wallet::sync::{
	events::{EventDispatcher, SyncEvent, SyncEventHandler},
	init_lock::{InitializationLock, LockedOperation},
	ledger::{AddOutcome, LedgerSnapshot, TransactionLedger},
	query_cache::{QueryCache, QueryCacheStats, QueryFingerprint},
	stats::SyncStats,
	subscriptions::SubscriptionRegistry,
	transaction_processor::TransactionProcessor,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// How a transaction was merged into the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
	Added,
	/// Already known in the same or a later group; dropped.
	Duplicate,
	/// Known in an earlier group; moved out of it.
	Promoted { from: TransactionGroup },
}

/// Read-only view of the engine for the presentation layer
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
	pub address: Option<String>,
	pub ready: bool,
	pub account: Option<AccountInfo>,
	pub epoch: u64,
	pub initialization_locked: bool,
	pub pending_operations: usize,
	pub subscriptions: usize,
	pub transactions: usize,
	pub last_synced_at: Option<DateTime<Utc>>,
}

/// Mutable per-session state. Only touched while holding `EngineInner::state`, and never held
/// across an await point.
#[derive(Default)]
struct SyncState {
	ledger: TransactionLedger,
	cache: QueryCache,
	active_address: Option<String>,
	account_info: Option<AccountInfo>,
	ready: bool,
	epoch: u64,
	requested_heights: HashSet<u64>,
	stats: SyncStats,
	last_synced_at: Option<DateTime<Utc>>,
}

impl SyncState {
	/// Dedup gate plus lifecycle promotion.
	fn merge(&mut self, group: TransactionGroup, transaction: Transaction) -> MergeOutcome {
		match self.ledger.group_of(&transaction.hash) {
			Some(current) if current.stage() < group.stage() => {
				self.ledger.remove(current, &transaction.hash);
				let outcome = self.ledger.add(group, transaction);
				debug_assert_eq!(outcome, AddOutcome::Added);
				self.stats.promotions += 1;
				MergeOutcome::Promoted { from: current }
			}
			Some(_) => {
				debug!("Dropping duplicate transaction {}", transaction.hash);
				self.stats.duplicates_dropped += 1;
				MergeOutcome::Duplicate
			}
			None => match self.ledger.add(group, transaction) {
				AddOutcome::Added => {
					self.stats.transactions_added += 1;
					MergeOutcome::Added
				}
				AddOutcome::Duplicate => {
					self.stats.duplicates_dropped += 1;
					MergeOutcome::Duplicate
				}
			},
		}
	}

	fn remove(&mut self, group: TransactionGroup, hash: &str) -> Option<Transaction> {
		let removed = self.ledger.remove(group, hash);
		if removed.is_some() {
			self.stats.removals += 1;
		}
		removed
	}

	/// Drop everything belonging to the current session and start a new epoch.
	fn reset(&mut self) {
		self.ledger.reset_all();
		self.cache.clear();
		self.requested_heights.clear();
		self.account_info = None;
		self.ready = false;
		self.last_synced_at = None;
		self.epoch += 1;

		match self.active_address.take() {
			Some(address) => {
				self.stats.finish(&address);
			}
			None => self.stats = SyncStats::default(),
		}
	}
}

struct EngineInner {
	account_service: Arc<dyn AccountService>,
	block_service: Arc<dyn BlockService>,
	push_channel: Arc<dyn PushChannel>,
	config: EngineConfig,
	processor: TransactionProcessor,
	lock: InitializationLock,
	switch_gate: Mutex<()>,
	state: Mutex<SyncState>,
	subscriptions: Mutex<SubscriptionRegistry>,
	observers: Mutex<Vec<Arc<dyn SyncEventHandler>>>,
}

impl EngineInner {
	async fn initialize_locked(self: &Arc<Self>, address: &str) -> Result<(), SyncError> {
		let needs_teardown = {
			let state = self.state.lock().await;
			if state.ready && state.active_address.as_deref() == Some(address) {
				info!("Already initialized for {}", address);
				return Ok(());
			}
			state.active_address.is_some() || state.ready
		};

		if needs_teardown {
			info!("Tearing down previous session before initializing {}", address);
			self.teardown_locked().await;
		}

		let epoch = {
			let mut state = self.state.lock().await;
			state.epoch += 1;
			state.active_address = Some(address.to_string());
			state.epoch
		};
		info!("Initializing transaction sync for {} (epoch {})", address, epoch);

		match self.account_service.get_info(address).await {
			Ok(info) => {
				let mut state = self.state.lock().await;
				if state.epoch == epoch {
					state.account_info = Some(info);
				}
			}
			Err(ApiError::NotFound(_)) => {
				info!("Account {} is not known to the node yet", address);
			}
			Err(e) => {
				error!("Failed to fetch account info for {}: {}", address, e);
				self.state.lock().await.stats.transport_failures += 1;
			}
		}

		let dispatcher = self.dispatcher_for(epoch).await;
		let opened = self
			.subscriptions
			.lock()
			.await
			.open(
				self.push_channel.as_ref(),
				address,
				&self.config.topics,
				epoch,
				dispatcher,
			)
			.await
			.map(|handle| handle.topics().len());
		match opened {
			Ok(topics) => debug!("Listening on {} topics for {}", topics, address),
			Err(e) => {
				error!("Failed to open subscriptions for {}: {}", address, e);
				self.teardown_locked().await;
				return Err(e);
			}
		}

		for group in [
			TransactionGroup::Confirmed,
			TransactionGroup::Unconfirmed,
			TransactionGroup::Partial,
		] {
			let query = PageQuery::first_page(group, address, self.config.page_size);
			if let Err(e) = self.fetch(query).await {
				warn!("Initial {} page for {} unavailable: {}", group, address, e);
			}
		}

		let mut state = self.state.lock().await;
		state.ready = true;
		state.last_synced_at = Some(Utc::now());
		info!(
			"Initialized {}: {} transactions, {} cached pages",
			address,
			state.ledger.len(),
			state.cache.len()
		);
		Ok(())
	}

	/// Close every subscription, then reset the ledger and the cache.
	async fn teardown_locked(&self) {
		let report = self.subscriptions.lock().await.close_all().await;
		if report.failed > 0 {
			warn!(
				"{} of {} subscription handles did not close cleanly",
				report.failed, report.closed
			);
		}

		let mut state = self.state.lock().await;
		state.reset();
		debug!("Session state reset (epoch {})", state.epoch);
	}

	async fn dispatcher_for(self: &Arc<Self>, epoch: u64) -> EventDispatcher {
		let mut dispatcher = EventDispatcher::new();
		dispatcher.register_handler(Arc::new(LedgerEventHandler {
			inner: Arc::downgrade(self),
			epoch,
		}));
		for observer in self.observers.lock().await.iter() {
			dispatcher.register_handler(observer.clone());
		}
		dispatcher
	}

	async fn fetch(&self, mut query: PageQuery) -> Result<Vec<Transaction>, SyncError> {
		if query.address.trim().is_empty() {
			warn!("Skipping {} page fetch: empty address", query.group);
			return Ok(Vec::new());
		}
		if query.page_size == 0 {
			query.page_size = self.config.page_size;
		}

		let key = QueryFingerprint::of(&query);
		let epoch = {
			let mut state = self.state.lock().await;
			if let Some(page) = state.cache.get(&key) {
				state.stats.cache_hits += 1;
				debug!("Serving {} page for {} from cache", query.group, query.address);
				return Ok(page);
			}
			state.epoch
		};

		debug!(
			"Fetching {} page for {} (size {}, continuation {:?})",
			query.group, query.address, query.page_size, query.continuation_id
		);
		let page = match self.account_service.get_transactions(&query).await {
			Ok(page) => self.processor.process_page(query.group, page),
			Err(e) => {
				error!(
					"Failed to fetch {} page for {}: {}",
					query.group, query.address, e
				);
				self.state.lock().await.stats.transport_failures += 1;
				return Err(e.into());
			}
		};

		let heights = {
			let mut state = self.state.lock().await;
			if state.epoch != epoch {
				debug!(
					"Discarding {} page for {}: session changed while fetching",
					query.group, query.address
				);
				state.stats.stale_discarded += 1;
				return Ok(page);
			}

			state.stats.pages_fetched += 1;
			for transaction in &page {
				state.merge(query.group, transaction.clone());
			}
			state.cache.put(key, page.clone());

			if query.group == TransactionGroup::Confirmed && self.config.fetch_block_heights {
				let heights = self
					.processor
					.referenced_heights(&page, &state.requested_heights);
				state.requested_heights.extend(heights.iter().copied());
				heights
			} else {
				Vec::new()
			}
		};

		if !heights.is_empty() {
			self.spawn_block_fetch(heights);
		}
		Ok(page)
	}

	/// Fire-and-forget block lookup; the page is returned without waiting for it.
	fn spawn_block_fetch(&self, heights: Vec<u64>) {
		let block_service = self.block_service.clone();
		tokio::spawn(async move {
			debug!("Fetching {} referenced blocks", heights.len());
			if let Err(e) = block_service.fetch_blocks(&heights).await {
				warn!("Block lookup for heights {:?} failed: {}", heights, e);
			}
		});
	}

	async fn apply_event(&self, event: &SyncEvent, epoch: u64) {
		let mut state = self.state.lock().await;
		if state.epoch != epoch {
			debug!("Discarding pushed event from ended session (epoch {})", epoch);
			state.stats.stale_discarded += 1;
			return;
		}
		state.stats.push_events += 1;

		match event {
			SyncEvent::TransactionReceived { transaction } => {
				let outcome = state.merge(transaction.group, transaction.clone());
				debug!("Pushed {} transaction {}: {:?}", transaction.group, transaction.hash, outcome);
			}
			SyncEvent::TransactionRemoved { group, hash } => {
				state.remove(*group, hash);
			}
			SyncEvent::TransactionRejected { hash, code } => {
				warn!("Transaction {} rejected by the node: {}", hash, code);
				for group in [TransactionGroup::Unconfirmed, TransactionGroup::Partial] {
					state.remove(group, hash);
				}
			}
			SyncEvent::ChannelError { address, error } => {
				warn!("Push channel for {} reported: {}", address, error);
			}
		}
	}
}

/// Routes pushed events of one session into the ledger.
struct LedgerEventHandler {
	inner: Weak<EngineInner>,
	epoch: u64,
}

#[async_trait::async_trait]
impl SyncEventHandler for LedgerEventHandler {
	async fn handle(&self, event: &SyncEvent) -> Result<(), SyncError> {
		if let Some(inner) = self.inner.upgrade() {
			inner.apply_event(event, self.epoch).await;
		}
		Ok(())
	}

	fn name(&self) -> &'static str {
		"LedgerEventHandler"
	}
}

/// Transaction synchronization engine for one wallet session.
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct SyncEngine {
	inner: Arc<EngineInner>,
}

impl SyncEngine {
	pub fn builder() -> SyncEngineBuilder {
		SyncEngineBuilder::new()
	}

	/// Engine talking to the node REST gateway and websocket endpoint named in `config`.
	pub fn from_config(config: EngineConfig) -> Result<Self, SyncError> {
		let client = Arc::new(HttpApiClient::from_config(&config)?);
		let push_channel = Arc::new(WebSocketPushChannel::new(config.ws_url.clone()));

		Self::builder()
			.with_account_service(client.clone())
			.with_block_service(client)
			.with_push_channel(push_channel)
			.with_config(config)
			.build()
	}

	/// Fetch account state, subscribe to pushes and load the first page of every group.
	///
	/// An empty address is a no-op. If the engine is ready for another address, that session
	/// is torn down first, inside the same lock hold.
	pub async fn initialize(&self, address: &str) -> Result<(), SyncError> {
		let address = address.trim().to_string();
		if address.is_empty() {
			warn!("Skipping initialize: empty address");
			return Ok(());
		}

		let inner = self.inner.clone();
		self.inner
			.lock
			.run(LockedOperation::Initialize, async move {
				inner.initialize_locked(&address).await
			})
			.await?
	}

	/// Close all subscriptions and clear the ledger and the cache.
	pub async fn uninitialize(&self) -> Result<(), SyncError> {
		let inner = self.inner.clone();
		self.inner
			.lock
			.run(LockedOperation::Uninitialize, async move {
				inner.teardown_locked().await;
				info!("Uninitialized transaction sync");
			})
			.await
	}

	/// Uninitialize, then initialize `new_address`. Concurrent switches run one at a time.
	pub async fn switch_account(&self, new_address: &str) -> Result<(), SyncError> {
		let _switching = self.inner.switch_gate.lock().await;
		info!("Switching account to {}", new_address);
		self.uninitialize().await?;
		self.initialize(new_address).await
	}

	/// Fetch a page for a group given by name.
	///
	/// Unknown or empty group names fall back to `confirmed`.
	pub async fn fetch_page(
		&self,
		group: &str,
		address: &str,
		page_size: u32,
		continuation_id: Option<&str>,
	) -> Result<Vec<Transaction>, SyncError> {
		let resolved = TransactionGroup::from_tag(group);
		if resolved.as_str() != group {
			debug!("Unknown transaction group {:?}, using {}", group, resolved);
		}

		self.fetch_group_page(PageQuery::new(
			resolved,
			address,
			page_size,
			continuation_id.map(str::to_string),
		))
		.await
	}

	/// Fetch a page, serving it from the query cache when the same query ran before.
	///
	/// Fresh pages are merged into the ledger and cached. Confirmed pages additionally trigger a
	/// background lookup of the blocks they reference.
	pub async fn fetch_group_page(&self, query: PageQuery) -> Result<Vec<Transaction>, SyncError> {
		self.inner.fetch(query).await
	}

	/// Merge a pushed transaction into the group it carries.
	pub async fn on_pushed_transaction(&self, transaction: Transaction) -> MergeOutcome {
		let group = transaction.group;
		self.inner.state.lock().await.merge(group, transaction)
	}

	/// Merge a locally submitted transaction into `group` through the dedup gate.
	///
	/// With `strict_hashes` configured, a hash that is not 64 hex characters is a
	/// `ValidationError`.
	pub async fn submit(
		&self,
		group: TransactionGroup,
		transaction: Transaction,
	) -> Result<MergeOutcome, SyncError> {
		self.inner.processor.check_hash(&transaction.hash)?;
		let transaction = self.inner.processor.process_transaction(group, transaction);
		let mut state = self.inner.state.lock().await;
		Ok(state.merge(group, transaction))
	}

	/// Remove a transaction from `group`, returning the stored copy.
	pub async fn remove(
		&self,
		group: TransactionGroup,
		transaction: &Transaction,
	) -> Option<Transaction> {
		self.inner.state.lock().await.remove(group, &transaction.hash)
	}

	/// Register an observer for pushed events.
	///
	/// Observers are attached to subscriptions opened after registration.
	pub async fn register_handler(&self, handler: Arc<dyn SyncEventHandler>) {
		self.inner.observers.lock().await.push(handler);
	}

	pub async fn snapshot(&self) -> LedgerSnapshot {
		self.inner.state.lock().await.ledger.snapshot()
	}

	/// Partial, then unconfirmed, then confirmed transactions.
	pub async fn all_transactions(&self) -> Vec<Transaction> {
		self.inner.state.lock().await.ledger.all_transactions()
	}

	pub async fn cached_pages(&self) -> Vec<(QueryFingerprint, Vec<Transaction>)> {
		self.inner.state.lock().await.cache.entries()
	}

	pub async fn cache_stats(&self) -> QueryCacheStats {
		self.inner.state.lock().await.cache.stats()
	}

	pub async fn stats(&self) -> SyncStats {
		self.inner.state.lock().await.stats.clone()
	}

	pub async fn is_ready(&self) -> bool {
		self.inner.state.lock().await.ready
	}

	/// Addresses with an open subscription handle.
	pub async fn subscribed_addresses(&self) -> Vec<String> {
		self.inner.subscriptions.lock().await.addresses()
	}

	pub async fn status(&self) -> EngineStatus {
		let subscriptions = self.inner.subscriptions.lock().await.len();
		let state = self.inner.state.lock().await;
		EngineStatus {
			address: state.active_address.clone(),
			ready: state.ready,
			account: state.account_info.clone(),
			epoch: state.epoch,
			initialization_locked: self.inner.lock.is_locked(),
			pending_operations: self.inner.lock.pending(),
			subscriptions,
			transactions: state.ledger.len(),
			last_synced_at: state.last_synced_at,
		}
	}

	pub async fn check_invariants(&self) -> Result<(), SyncError> {
		self.inner.state.lock().await.ledger.check_invariants()
	}

	pub fn config(&self) -> &EngineConfig {
		&self.inner.config
	}
}

/// Builder wiring services and configuration into a [`SyncEngine`]
#[derive(Default)]
pub struct SyncEngineBuilder {
	account_service: Option<Arc<dyn AccountService>>,
	block_service: Option<Arc<dyn BlockService>>,
	push_channel: Option<Arc<dyn PushChannel>>,
	config: Option<EngineConfig>,
}

impl SyncEngineBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_account_service(mut self, service: Arc<dyn AccountService>) -> Self {
		self.account_service = Some(service);
		self
	}

	pub fn with_block_service(mut self, service: Arc<dyn BlockService>) -> Self {
		self.block_service = Some(service);
		self
	}

	pub fn with_push_channel(mut self, channel: Arc<dyn PushChannel>) -> Self {
		self.push_channel = Some(channel);
		self
	}

	/// Sets the configuration; defaults apply when omitted
	pub fn with_config(mut self, config: EngineConfig) -> Self {
		self.config = Some(config);
		self
	}

	pub fn build(self) -> Result<SyncEngine, SyncError> {
		let account_service = self
			.account_service
			.ok_or_else(|| SyncError::ConfigError("account service not set".to_string()))?;
		let block_service = self
			.block_service
			.ok_or_else(|| SyncError::ConfigError("block service not set".to_string()))?;
		let push_channel = self
			.push_channel
			.ok_or_else(|| SyncError::ConfigError("push channel not set".to_string()))?;
		let config = self.config.unwrap_or_default();
		config.validate()?;
		let processor = TransactionProcessor::with_strict_hashes(config.strict_hashes);

		Ok(SyncEngine {
			inner: Arc::new(EngineInner {
				account_service,
				block_service,
				push_channel,
				config,
				processor,
				lock: InitializationLock::new(),
				switch_gate: Mutex::new(()),
				state: Mutex::new(SyncState::default()),
				subscriptions: Mutex::new(SubscriptionRegistry::new()),
				observers: Mutex::new(Vec::new()),
			}),
		})
	}
}
