//! S3-compatible snapshot store.
//!
//! Stores one object per snapshot key in a bucket. Works against AWS S3
//! and any S3-compatible endpoint (MinIO, Cellar, Garage) via a custom
//! endpoint URL with path-style addressing.
//!
//! Absent vs error contract: `NoSuchKey` is absent; access-denied is
//! logged and reported as absent so a misconfigured store degrades instead
//! of failing document creation; everything else propagates.

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, warn};

use yrelay_types::error::{Error, RelayResult};
use yrelay_types::snapshot_adapter::SnapshotStore;

/// Connection settings for an S3-compatible store.
#[derive(Clone, Debug)]
pub struct StoreConfig {
	/// Custom endpoint URL; `None` targets AWS S3 proper.
	pub endpoint: Option<String>,
	pub bucket: String,
	pub access_key: String,
	pub secret_key: String,
	pub region: Option<String>,
}

#[derive(Debug)]
pub struct SnapshotStoreS3 {
	client: Client,
	bucket: String,
}

impl SnapshotStoreS3 {
	pub fn new(config: StoreConfig) -> Self {
		let credentials =
			Credentials::new(&config.access_key, &config.secret_key, None, None, "yrelay");
		let region = Region::new(config.region.unwrap_or_else(|| "us-east-1".to_owned()));

		let mut builder = aws_sdk_s3::Config::builder()
			.behavior_version(BehaviorVersion::latest())
			.region(region)
			.credentials_provider(credentials)
			.force_path_style(true);
		if let Some(endpoint) = config.endpoint {
			builder = builder.endpoint_url(endpoint);
		}

		Self { client: Client::from_conf(builder.build()), bucket: config.bucket }
	}
}

fn is_access_denied(code: Option<&str>) -> bool {
	matches!(code, Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"))
}

#[async_trait]
impl SnapshotStore for SnapshotStoreS3 {
	async fn put(&self, key: &str, data: &[u8]) -> RelayResult<()> {
		self.client
			.put_object()
			.bucket(&self.bucket)
			.key(key)
			.body(ByteStream::from(data.to_vec()))
			.send()
			.await
			.map_err(|e| Error::StoreError(format!("put {} failed: {}", key, e)))?;
		debug!("snapshot stored: s3://{}/{}", self.bucket, key);
		Ok(())
	}

	async fn get(&self, key: &str) -> RelayResult<Option<Vec<u8>>> {
		let output = self.client.get_object().bucket(&self.bucket).key(key).send().await;
		match output {
			Ok(output) => {
				let data = output
					.body
					.collect()
					.await
					.map_err(|e| Error::StoreError(format!("read {} failed: {}", key, e)))?;
				Ok(Some(data.into_bytes().to_vec()))
			}
			Err(e) => {
				let service_error = e.into_service_error();
				if service_error.is_no_such_key() {
					return Ok(None);
				}
				if is_access_denied(service_error.code()) {
					warn!("store denied access to {}: {}", key, service_error);
					return Ok(None);
				}
				Err(Error::StoreError(format!("get {} failed: {}", key, service_error)))
			}
		}
	}

	async fn delete(&self, key: &str) -> RelayResult<()> {
		self.client
			.delete_object()
			.bucket(&self.bucket)
			.key(key)
			.send()
			.await
			.map_err(|e| Error::StoreError(format!("delete {} failed: {}", key, e)))?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_access_denied_codes() {
		assert!(is_access_denied(Some("AccessDenied")));
		assert!(is_access_denied(Some("InvalidAccessKeyId")));
		assert!(!is_access_denied(Some("NoSuchBucket")));
		assert!(!is_access_denied(None));
	}
}

// vim: ts=4
