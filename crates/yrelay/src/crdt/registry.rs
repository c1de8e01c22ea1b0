//! Document registry.
//!
//! Process-wide mapping from document name to its actor. Creation is
//! demand-driven with at most one creation in flight per name: concurrent
//! callers wait on the same once-cell and share the created handle. A
//! failed creation removes the name again so the next caller retries from
//! scratch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

use crate::crdt::doc::{DocActor, DocHandle};
use crate::prelude::*;

type Entry = Arc<OnceCell<DocHandle>>;

#[derive(Debug, Default)]
pub struct DocRegistry {
	docs: Mutex<HashMap<Box<str>, Entry>>,
}

impl DocRegistry {
	pub fn new() -> Self {
		Self { docs: Mutex::new(HashMap::new()) }
	}

	/// Get the actor for `name`, creating it when absent.
	pub async fn get(&self, app: &App, name: &str) -> RelayResult<DocHandle> {
		if name.is_empty() {
			return Err(Error::ValidationError("empty document name".into()));
		}

		let entry = {
			let mut docs = self.lock()?;
			docs.entry(name.into()).or_default().clone()
		};

		match entry.get_or_try_init(|| DocActor::spawn(app.clone(), name)).await {
			Ok(handle) => Ok(handle.clone()),
			Err(e) => {
				// Drop the failed entry so the next call starts over, but
				// leave it alone when someone else already replaced it.
				let mut docs = self.lock()?;
				if let Some(current) = docs.get(name) {
					if Arc::ptr_eq(current, &entry) {
						docs.remove(name);
					}
				}
				Err(e)
			}
		}
	}

	/// Remove the entry for `name` when it still belongs to `actor_id`.
	/// Called by the actor itself at the start of its tear-down, so a
	/// subsequent `get` creates a fresh actor.
	pub(crate) fn remove(&self, name: &str, actor_id: u64) {
		let Ok(mut docs) = self.lock() else { return };
		let same = docs
			.get(name)
			.and_then(|entry| entry.get())
			.is_some_and(|handle| handle.actor_id() == actor_id);
		if same {
			docs.remove(name);
		}
	}

	/// Close every actor and empty the registry. Used by the broker
	/// supervisor after a rebuild and by shutdown.
	pub async fn clear(&self) {
		let handles: Vec<DocHandle> = {
			let Ok(mut docs) = self.lock() else { return };
			docs.drain().filter_map(|(_, entry)| entry.get().cloned()).collect()
		};
		for handle in handles {
			handle.close().await;
		}
	}

	/// Number of registered documents (creations in flight included).
	pub fn len(&self) -> usize {
		self.lock().map(|docs| docs.len()).unwrap_or(0)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn lock(&self) -> RelayResult<std::sync::MutexGuard<'_, HashMap<Box<str>, Entry>>> {
		self.docs
			.lock()
			.map_err(|_| Error::Internal("document registry lock poisoned".into()))
	}
}

// vim: ts=4
