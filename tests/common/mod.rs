#![allow(dead_code)]

use futures::channel::mpsc::{self, UnboundedSender};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wallet_tx_sync::SyncEngine;
use wallet_tx_sync::api::{
	AccountInfo, AccountService, ApiError, BlockService, EventStream, Listener, PageQuery,
	PushChannel, PushEvent, Topic, Transaction, TransactionGroup,
};
use wallet_tx_sync::config::EngineConfig;
use wallet_tx_sync::wallet::sync::ledger::LedgerSnapshot;

pub const ADDRESS_A: &str = "TALICEAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
pub const ADDRESS_B: &str = "TBOBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB";

/// Deterministic 64 hex character transaction hash.
pub fn hash(n: u64) -> String {
	format!("{:064X}", n)
}

pub fn tx(group: TransactionGroup, n: u64) -> Transaction {
	Transaction::new(group, hash(n))
}

type PageKey = (TransactionGroup, String, Option<String>);

/// In-memory account service serving canned pages.
#[derive(Default)]
pub struct MockAccountService {
	pages: Mutex<HashMap<PageKey, Vec<Transaction>>>,
	pub info_calls: AtomicUsize,
	pub page_calls: AtomicUsize,
	fail_pages: AtomicBool,
	delay: Mutex<Option<Duration>>,
}

impl MockAccountService {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_page(
		&self,
		group: TransactionGroup,
		address: &str,
		continuation: Option<&str>,
		page: Vec<Transaction>,
	) {
		self.pages.lock().unwrap().insert(
			(group, address.to_string(), continuation.map(str::to_string)),
			page,
		);
	}

	pub fn set_failing(&self, failing: bool) {
		self.fail_pages.store(failing, Ordering::SeqCst);
	}

	pub fn set_delay(&self, delay: Option<Duration>) {
		*self.delay.lock().unwrap() = delay;
	}

	pub fn page_calls(&self) -> usize {
		self.page_calls.load(Ordering::SeqCst)
	}
}

#[async_trait::async_trait]
impl AccountService for MockAccountService {
	async fn get_info(&self, address: &str) -> Result<AccountInfo, ApiError> {
		self.info_calls.fetch_add(1, Ordering::SeqCst);
		Ok(AccountInfo {
			address: address.to_string(),
			address_height: Some(1),
			public_key: None,
			mosaics: Vec::new(),
		})
	}

	async fn get_transactions(&self, query: &PageQuery) -> Result<Vec<Transaction>, ApiError> {
		self.page_calls.fetch_add(1, Ordering::SeqCst);
		let delay = *self.delay.lock().unwrap();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		if self.fail_pages.load(Ordering::SeqCst) {
			return Err(ApiError::StatusError {
				status: 503,
				body: "node unavailable".to_string(),
			});
		}

		let key = (
			query.group,
			query.address.clone(),
			query.continuation_id.clone(),
		);
		Ok(self
			.pages
			.lock()
			.unwrap()
			.get(&key)
			.cloned()
			.unwrap_or_default())
	}
}

/// Block service recording every requested batch of heights.
#[derive(Default)]
pub struct MockBlockService {
	pub requests: Mutex<Vec<Vec<u64>>>,
}

impl MockBlockService {
	pub fn requests(&self) -> Vec<Vec<u64>> {
		self.requests.lock().unwrap().clone()
	}
}

#[async_trait::async_trait]
impl BlockService for MockBlockService {
	async fn fetch_blocks(&self, heights: &[u64]) -> Result<(), ApiError> {
		self.requests.lock().unwrap().push(heights.to_vec());
		Ok(())
	}
}

type Senders = Arc<Mutex<HashMap<(String, Topic), UnboundedSender<Result<PushEvent, ApiError>>>>>;

/// Push channel whose listeners are driven from the test.
///
/// Every listener operation is appended to a shared log such as `subscribe confirmedAdded TA`.
#[derive(Default)]
pub struct MockPushChannel {
	senders: Senders,
	log: Arc<Mutex<Vec<String>>>,
	fail_close: Mutex<HashSet<String>>,
	fail_subscribe: Mutex<Option<Topic>>,
}

impl MockPushChannel {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn log(&self) -> Vec<String> {
		self.log.lock().unwrap().clone()
	}

	pub fn fail_close_for(&self, address: &str) {
		self.fail_close.lock().unwrap().insert(address.to_string());
	}

	pub fn fail_subscribe_on(&self, topic: Topic) {
		*self.fail_subscribe.lock().unwrap() = Some(topic);
	}

	/// Deliver an event to a live subscription. Returns false if nobody is subscribed.
	pub fn push(&self, address: &str, topic: Topic, event: PushEvent) -> bool {
		let senders = self.senders.lock().unwrap();
		match senders.get(&(address.to_string(), topic)) {
			Some(sender) => sender.unbounded_send(Ok(event)).is_ok(),
			None => false,
		}
	}

	pub fn push_error(&self, address: &str, topic: Topic, message: &str) -> bool {
		let senders = self.senders.lock().unwrap();
		match senders.get(&(address.to_string(), topic)) {
			Some(sender) => sender
				.unbounded_send(Err(ApiError::ChannelError(message.to_string())))
				.is_ok(),
			None => false,
		}
	}

	/// Addresses with a listener that was opened and never closed.
	pub fn open_addresses(&self) -> Vec<String> {
		let mut open: Vec<String> = Vec::new();
		for entry in self.log() {
			let mut parts = entry.split(' ');
			match (parts.next(), parts.next_back()) {
				(Some("open"), Some(address)) => open.push(address.to_string()),
				(Some("close"), Some(address)) => {
					if let Some(pos) = open.iter().position(|a| a == address) {
						open.remove(pos);
					}
				}
				_ => {}
			}
		}
		open
	}
}

#[async_trait::async_trait]
impl PushChannel for MockPushChannel {
	async fn open(&self, address: &str) -> Result<Box<dyn Listener>, ApiError> {
		self.log.lock().unwrap().push(format!("open {}", address));
		Ok(Box::new(MockListener {
			address: address.to_string(),
			senders: self.senders.clone(),
			log: self.log.clone(),
			open: true,
			fail_close: self.fail_close.lock().unwrap().contains(address),
			fail_subscribe: *self.fail_subscribe.lock().unwrap(),
		}))
	}
}

struct MockListener {
	address: String,
	senders: Senders,
	log: Arc<Mutex<Vec<String>>>,
	open: bool,
	fail_close: bool,
	fail_subscribe: Option<Topic>,
}

#[async_trait::async_trait]
impl Listener for MockListener {
	fn address(&self) -> &str {
		&self.address
	}

	fn is_open(&self) -> bool {
		self.open
	}

	async fn subscribe(&mut self, topic: Topic) -> Result<EventStream, ApiError> {
		if self.fail_subscribe == Some(topic) {
			return Err(ApiError::ChannelError(format!("cannot subscribe {}", topic)));
		}
		self.log
			.lock()
			.unwrap()
			.push(format!("subscribe {} {}", topic, self.address));
		let (sender, receiver) = mpsc::unbounded();
		self.senders
			.lock()
			.unwrap()
			.insert((self.address.clone(), topic), sender);
		Ok(Box::pin(receiver))
	}

	async fn unsubscribe(&mut self, topic: Topic) -> Result<(), ApiError> {
		self.log
			.lock()
			.unwrap()
			.push(format!("unsubscribe {} {}", topic, self.address));
		self.senders
			.lock()
			.unwrap()
			.remove(&(self.address.clone(), topic));
		Ok(())
	}

	async fn close(&mut self) -> Result<(), ApiError> {
		if !self.open {
			return Ok(());
		}
		self.open = false;
		self.log
			.lock()
			.unwrap()
			.push(format!("close {}", self.address));
		let address = self.address.clone();
		self.senders
			.lock()
			.unwrap()
			.retain(|(addr, _), _| *addr != address);
		if self.fail_close {
			return Err(ApiError::ChannelError("close failed".to_string()));
		}
		Ok(())
	}
}

pub struct Harness {
	pub engine: SyncEngine,
	pub accounts: Arc<MockAccountService>,
	pub blocks: Arc<MockBlockService>,
	pub channel: Arc<MockPushChannel>,
}

pub fn harness() -> Harness {
	harness_with(EngineConfig::default())
}

pub fn harness_with(config: EngineConfig) -> Harness {
	let accounts = Arc::new(MockAccountService::new());
	let blocks = Arc::new(MockBlockService::default());
	let channel = Arc::new(MockPushChannel::new());

	let engine = SyncEngine::builder()
		.with_account_service(accounts.clone())
		.with_block_service(blocks.clone())
		.with_push_channel(channel.clone())
		.with_config(config)
		.build()
		.expect("engine builds");

	Harness {
		engine,
		accounts,
		blocks,
		channel,
	}
}

/// Poll the ledger until `predicate` holds, failing after one second.
pub async fn wait_for_ledger(
	engine: &SyncEngine,
	predicate: impl Fn(&LedgerSnapshot) -> bool,
) -> LedgerSnapshot {
	for _ in 0..100 {
		let snapshot = engine.snapshot().await;
		if predicate(&snapshot) {
			return snapshot;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("ledger never reached the expected state");
}

/// Poll `blocks` until at least `count` batches were requested.
pub async fn wait_for_block_requests(blocks: &MockBlockService, count: usize) -> Vec<Vec<u64>> {
	for _ in 0..100 {
		let requests = blocks.requests();
		if requests.len() >= count {
			return requests;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("expected {} block requests, saw {:?}", count, blocks.requests());
}
