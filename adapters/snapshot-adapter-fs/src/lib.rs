//! Filesystem snapshot store.
//!
//! One file per key under a root directory. Writes go through a temporary
//! sibling and a rename so a crash never leaves a torn snapshot behind.
//! Suitable for single-node deployments and tests; clustered deployments
//! use the S3 adapter.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use yrelay_types::error::{Error, RelayResult};
use yrelay_types::snapshot_adapter::SnapshotStore;

#[derive(Debug)]
pub struct SnapshotStoreFs {
	root: PathBuf,
}

impl SnapshotStoreFs {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	/// Resolve a key below the root. Keys are internal, but document names
	/// flow into them, so parent components are refused outright.
	fn path_for(&self, key: &str) -> RelayResult<PathBuf> {
		let relative = Path::new(key);
		let traversal = relative
			.components()
			.any(|c| !matches!(c, Component::Normal(_)));
		if traversal || relative.is_absolute() {
			return Err(Error::ValidationError(format!("unsafe snapshot key: {}", key)));
		}
		Ok(self.root.join(relative))
	}
}

#[async_trait]
impl SnapshotStore for SnapshotStoreFs {
	async fn put(&self, key: &str, data: &[u8]) -> RelayResult<()> {
		let path = self.path_for(key)?;
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		let tmp = path.with_extension("tmp");
		tokio::fs::write(&tmp, data).await?;
		tokio::fs::rename(&tmp, &path).await?;
		debug!("snapshot written: {}", path.display());
		Ok(())
	}

	async fn get(&self, key: &str) -> RelayResult<Option<Vec<u8>>> {
		let path = self.path_for(key)?;
		match tokio::fs::read(&path).await {
			Ok(data) => Ok(Some(data)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
				warn!("snapshot store denied access to {}: {}", path.display(), e);
				Ok(None)
			}
			Err(e) => Err(e.into()),
		}
	}

	async fn delete(&self, key: &str) -> RelayResult<()> {
		let path = self.path_for(key)?;
		match tokio::fs::remove_file(&path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}
}


// vim: ts=4
