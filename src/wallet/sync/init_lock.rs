//! Serialization of initialize / uninitialize sequences.
//!
//! Callers queue on a fair (FIFO) mutex. Once a caller holds the lock its body is moved onto a
//! task together with the guard, so the body always runs to completion and the lock is only
//! released afterwards, even if the caller stops waiting for the result.

use crate::wallet::SyncError;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Operation running under the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockedOperation {
	Initialize,
	Uninitialize,
}

impl LockedOperation {
	fn encode(operation: Option<LockedOperation>) -> u8 {
		match operation {
			None => 0,
			Some(LockedOperation::Initialize) => 1,
			Some(LockedOperation::Uninitialize) => 2,
		}
	}

	fn decode(value: u8) -> Option<LockedOperation> {
		match value {
			1 => Some(LockedOperation::Initialize),
			2 => Some(LockedOperation::Uninitialize),
			_ => None,
		}
	}
}

impl fmt::Display for LockedOperation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LockedOperation::Initialize => f.write_str("initialize"),
			LockedOperation::Uninitialize => f.write_str("uninitialize"),
		}
	}
}

/// Counts a caller as queued until it acquires the lock or is dropped while waiting.
struct Queued<'a>(&'a AtomicUsize);

impl<'a> Queued<'a> {
	fn enter(waiting: &'a AtomicUsize) -> Self {
		waiting.fetch_add(1, Ordering::SeqCst);
		Self(waiting)
	}
}

impl Drop for Queued<'_> {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::SeqCst);
	}
}

/// Owned by the running body. Clears the holder before the gate is released, also on panic.
struct Holding {
	holder: Arc<AtomicU8>,
	completed: OwnedMutexGuard<u64>,
}

impl Drop for Holding {
	fn drop(&mut self) {
		self.holder
			.store(LockedOperation::encode(None), Ordering::SeqCst);
	}
}

#[derive(Debug, Default)]
pub struct InitializationLock {
	/// Number of bodies that ran to completion
	gate: Arc<Mutex<u64>>,
	/// Callers queued behind the holder
	waiting: Arc<AtomicUsize>,
	/// Operation of the current holder
	holder: Arc<AtomicU8>,
}

impl InitializationLock {
	pub fn new() -> Self {
		Self::default()
	}

	/// Run `body` once every previously queued operation has finished.
	///
	/// A panic inside `body` is re-raised here after the lock is released.
	pub async fn run<F>(&self, operation: LockedOperation, body: F) -> Result<F::Output, SyncError>
	where
		F: Future + Send + 'static,
		F::Output: Send + 'static,
	{
		let queued = Queued::enter(&self.waiting);
		let completed = self.gate.clone().lock_owned().await;
		drop(queued);

		self.holder
			.store(LockedOperation::encode(Some(operation)), Ordering::SeqCst);
		debug!("Acquired initialization lock for {}", operation);

		let holding = Holding {
			holder: self.holder.clone(),
			completed,
		};
		let task = tokio::spawn(async move {
			let mut holding = holding;
			let output = body.await;
			*holding.completed += 1;
			debug!("Releasing initialization lock after {}", operation);
			output
		});

		match task.await {
			Ok(output) => Ok(output),
			Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
			Err(e) => Err(SyncError::TaskError(format!(
				"{} did not run to completion: {}",
				operation, e
			))),
		}
	}

	pub fn is_locked(&self) -> bool {
		self.gate.try_lock().is_err()
	}

	/// Operations queued behind the current holder.
	pub fn pending(&self) -> usize {
		self.waiting.load(Ordering::SeqCst)
	}

	/// Operation currently holding the lock.
	pub fn holder(&self) -> Option<LockedOperation> {
		LockedOperation::decode(self.holder.load(Ordering::SeqCst))
	}

	/// Number of completed bodies, `None` while the lock is held.
	pub fn completed(&self) -> Option<u64> {
		self.gate.try_lock().ok().map(|completed| *completed)
	}
}
