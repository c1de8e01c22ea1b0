//! Cleanup tracker.
//!
//! Document actors run as detached tasks; tear-down (final snapshot, broker
//! handle closes) happens after their registry entry is already gone. The
//! tracker collects those in-flight tasks so shutdown can wait for all of
//! them before closing the broker client. Individual task failures are
//! counted and logged, never propagated.

use std::sync::Mutex;
use tokio::task::JoinSet;

use crate::prelude::*;

#[derive(Debug, Default)]
pub struct CleanupTracker {
	tasks: Mutex<JoinSet<RelayResult<()>>>,
}

impl CleanupTracker {
	pub fn new() -> Self {
		Self { tasks: Mutex::new(JoinSet::new()) }
	}

	/// Register a tear-down task. Must be called from within a tokio
	/// runtime.
	pub fn spawn<F>(&self, task: F)
	where
		F: Future<Output = RelayResult<()>> + Send + 'static,
	{
		match self.tasks.lock() {
			Ok(mut tasks) => {
				tasks.spawn(task);
			}
			Err(_) => warn!("cleanup tracker lock poisoned, task dropped"),
		}
	}

	/// Number of tasks still tracked (finished-but-unreaped included).
	pub fn len(&self) -> usize {
		self.tasks.lock().map(|tasks| tasks.len()).unwrap_or(0)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Await every registered task. Returns the number of failures.
	pub async fn wait(&self) -> usize {
		let mut tasks = match self.tasks.lock() {
			Ok(mut tasks) => std::mem::take(&mut *tasks),
			Err(_) => {
				warn!("cleanup tracker lock poisoned, skipping wait");
				return 0;
			}
		};

		let mut failures = 0;
		while let Some(res) = tasks.join_next().await {
			match res {
				Ok(Ok(())) => {}
				Ok(Err(e)) => {
					warn!("cleanup task failed: {}", e);
					failures += 1;
				}
				Err(e) => {
					warn!("cleanup task panicked or was aborted: {}", e);
					failures += 1;
				}
			}
		}
		failures
	}
}


// vim: ts=4
