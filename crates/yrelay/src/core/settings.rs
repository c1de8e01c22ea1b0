//! Configuration types.
//!
//! The whole configuration is one serde value: loaded from an optional YAML
//! file, overridden by environment variables, constructed once in `main`
//! and passed down through [`crate::core::app::AppState`].

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use yrelay_types::prelude::*;

/// Messages between snapshots, and the replay fold target.
pub const DEFAULT_SNAPSHOT_INTERVAL: u32 = 30;

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	/// Listen address, `host:port`.
	pub listen: Box<str>,

	pub broker: BrokerConfig,
	pub storage: StorageConfig,
	pub store: StoreConfig,
	pub replay: ReplayConfig,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			listen: "127.0.0.1:7020".into(),
			broker: BrokerConfig::default(),
			storage: StorageConfig::default(),
			store: StoreConfig::default(),
			replay: ReplayConfig::default(),
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrokerConfig {
	/// Broker service URL. Unused by in-process backends.
	pub url: Box<str>,
	pub token: Option<Box<str>>,
	pub tenant: Box<str>,
	pub namespace: Box<str>,
	pub topic_prefix: Box<str>,
}

impl Default for BrokerConfig {
	fn default() -> Self {
		Self {
			url: "pulsar://127.0.0.1:6650".into(),
			token: None,
			tenant: "public".into(),
			namespace: "default".into(),
			topic_prefix: "yrelay-".into(),
		}
	}
}

impl BrokerConfig {
	/// Full topic path for a document.
	pub fn topic(&self, doc_name: &str) -> String {
		format!(
			"persistent://{}/{}/{}{}",
			self.tenant, self.namespace, self.topic_prefix, doc_name
		)
	}

	/// Dedicated topic used by the connection supervisor's probe.
	pub fn health_topic(&self) -> String {
		format!(
			"persistent://{}/{}/{}health-check",
			self.tenant, self.namespace, self.topic_prefix
		)
	}

	/// Per-document subscription name.
	pub fn subscription(&self, doc_name: &str) -> String {
		format!("{}-subscription", doc_name)
	}
}

/// Persistence mode.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
pub enum StorageMode {
	/// No durable state: join the topic from current. The simplest correct
	/// configuration, suitable for ephemeral sessions.
	#[default]
	#[serde(rename = "none")]
	None,
	/// Object-store snapshots, live subscription from current.
	#[serde(rename = "object")]
	Object,
	/// Object-store snapshots plus checkpointed replay of the topic.
	#[serde(rename = "broker+object")]
	BrokerObject,
}

impl StorageMode {
	pub fn persists(self) -> bool {
		!matches!(self, StorageMode::None)
	}

	pub fn replays(self) -> bool {
		matches!(self, StorageMode::BrokerObject)
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
	pub mode: StorageMode,

	/// Broker messages folded between snapshot writes.
	pub snapshot_interval: u32,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self { mode: StorageMode::None, snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL }
	}
}

/// Object-store endpoint settings (S3-compatible).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
	pub endpoint: Option<Box<str>>,
	pub bucket: Option<Box<str>>,
	pub access_key: Option<Box<str>>,
	pub secret_key: Option<Box<str>>,
	pub region: Option<Box<str>>,
}

/// Replay tuning. Defaults are the production values; tests tighten them.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReplayConfig {
	/// Per-read timeout for the replay reader.
	pub read_timeout_ms: u64,

	/// Consecutive read timeouts after which replay stops.
	pub max_read_timeouts: u32,

	/// Wall-clock cap on the whole replay, independent of per-read bounds.
	pub replay_cap_ms: u64,
}

impl Default for ReplayConfig {
	fn default() -> Self {
		Self { read_timeout_ms: 2000, max_read_timeouts: 3, replay_cap_ms: 15_000 }
	}
}

impl ReplayConfig {
	pub fn read_timeout(&self) -> Duration {
		Duration::from_millis(self.read_timeout_ms)
	}

	pub fn replay_cap(&self) -> Duration {
		Duration::from_millis(self.replay_cap_ms)
	}
}

impl Config {
	/// Load configuration: YAML file (when given), then environment
	/// variable overrides on top.
	pub fn load(path: Option<&Path>) -> RelayResult<Config> {
		let mut config = match path {
			Some(path) => {
				let raw = std::fs::read_to_string(path)?;
				serde_yaml::from_str(&raw)
					.map_err(|e| Error::ConfigError(format!("invalid config file: {}", e)))?
			}
			None => Config::default(),
		};
		config.apply_env();

		if config.storage.snapshot_interval == 0 {
			return Err(Error::ConfigError("snapshotInterval must be at least 1".into()));
		}
		Ok(config)
	}

	fn apply_env(&mut self) {
		if let Ok(v) = std::env::var("YRELAY_LISTEN") {
			self.listen = v.into();
		}
		if let Ok(v) = std::env::var("YRELAY_BROKER_URL") {
			self.broker.url = v.into();
		}
		if let Ok(v) = std::env::var("YRELAY_BROKER_TOKEN") {
			self.broker.token = Some(v.into());
		}
		if let Ok(v) = std::env::var("YRELAY_BROKER_TENANT") {
			self.broker.tenant = v.into();
		}
		if let Ok(v) = std::env::var("YRELAY_BROKER_NAMESPACE") {
			self.broker.namespace = v.into();
		}
		if let Ok(v) = std::env::var("YRELAY_TOPIC_PREFIX") {
			self.broker.topic_prefix = v.into();
		}
		if let Ok(v) = std::env::var("YRELAY_STORAGE_MODE") {
			match v.as_str() {
				"none" => self.storage.mode = StorageMode::None,
				"object" => self.storage.mode = StorageMode::Object,
				"broker+object" => self.storage.mode = StorageMode::BrokerObject,
				other => warn!("unknown YRELAY_STORAGE_MODE '{}', keeping {:?}", other, self.storage.mode),
			}
		}
		if let Ok(v) = std::env::var("YRELAY_SNAPSHOT_INTERVAL") {
			match v.parse() {
				Ok(n) => self.storage.snapshot_interval = n,
				Err(_) => warn!("invalid YRELAY_SNAPSHOT_INTERVAL '{}'", v),
			}
		}
		if let Ok(v) = std::env::var("YRELAY_STORE_ENDPOINT") {
			self.store.endpoint = Some(v.into());
		}
		if let Ok(v) = std::env::var("YRELAY_STORE_BUCKET") {
			self.store.bucket = Some(v.into());
		}
		if let Ok(v) = std::env::var("YRELAY_STORE_ACCESS_KEY") {
			self.store.access_key = Some(v.into());
		}
		if let Ok(v) = std::env::var("YRELAY_STORE_SECRET_KEY") {
			self.store.secret_key = Some(v.into());
		}
		if let Ok(v) = std::env::var("YRELAY_STORE_REGION") {
			self.store.region = Some(v.into());
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = Config::default();
		assert_eq!(config.storage.mode, StorageMode::None);
		assert_eq!(config.storage.snapshot_interval, 30);
		assert_eq!(config.replay.max_read_timeouts, 3);
	}

	#[test]
	fn test_topic_path() {
		let broker = BrokerConfig::default();
		assert_eq!(broker.topic("notes"), "persistent://public/default/yrelay-notes");
		assert_eq!(broker.subscription("notes"), "notes-subscription");
	}

	#[test]
	fn test_yaml_parse() {
		let yaml = r#"
listen: "0.0.0.0:9000"
broker:
  tenant: "team"
  topicPrefix: "docs-"
storage:
  mode: "broker+object"
  snapshotInterval: 5
"#;
		let config: Config = serde_yaml::from_str(yaml).unwrap();
		assert_eq!(config.listen.as_ref(), "0.0.0.0:9000");
		assert_eq!(config.broker.tenant.as_ref(), "team");
		assert_eq!(config.storage.mode, StorageMode::BrokerObject);
		assert_eq!(config.storage.snapshot_interval, 5);
		assert_eq!(config.broker.topic("d"), "persistent://team/default/docs-d");
	}
}

// vim: ts=4
