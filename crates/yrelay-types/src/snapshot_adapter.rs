//! Snapshot Store Adapter
//!
//! Trait for pluggable object-store backends holding compacted document
//! snapshots. One opaque blob per key; the engine owns the record format.
//!
//! The absent/error contract matters: a missing object and a
//! credential/permission failure both come back as `Ok(None)` (the latter
//! with a warning), so a misconfigured store degrades to replay-from-earliest
//! instead of failing document creation. Everything else propagates.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::prelude::*;

#[async_trait]
pub trait SnapshotStore: Debug + Send + Sync {
	/// Store a blob under `key`, replacing any previous value.
	async fn put(&self, key: &str, data: &[u8]) -> RelayResult<()>;

	/// Read the blob under `key`. `Ok(None)` when absent.
	async fn get(&self, key: &str) -> RelayResult<Option<Vec<u8>>>;

	/// Remove the blob under `key`. Removing an absent key is not an error.
	async fn delete(&self, key: &str) -> RelayResult<()>;
}

/// Object key for a document snapshot.
pub fn snapshot_key(doc_name: &str) -> String {
	format!("snapshots/{}.snapshot", doc_name)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_snapshot_key() {
		assert_eq!(snapshot_key("notes"), "snapshots/notes.snapshot");
	}
}

// vim: ts=4
