//! App state type

use std::sync::Arc;

use crate::core::cleanup::CleanupTracker;
use crate::core::settings::Config;
use crate::crdt::registry::DocRegistry;
use crate::prelude::*;

use yrelay_types::auth_adapter::AuthStrategy;
use yrelay_types::broker_adapter::BrokerAdapter;
use yrelay_types::snapshot_adapter::SnapshotStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppState {
	pub config: Config,

	pub broker: Arc<dyn BrokerAdapter>,
	pub snapshots: Option<Arc<dyn SnapshotStore>>,
	pub auth: Arc<dyn AuthStrategy>,

	pub docs: DocRegistry,
	pub cleanup: CleanupTracker,
}

pub type App = Arc<AppState>;

pub struct Adapters {
	pub broker: Option<Arc<dyn BrokerAdapter>>,
	pub snapshots: Option<Arc<dyn SnapshotStore>>,
	pub auth: Option<Arc<dyn AuthStrategy>>,
}

impl AppState {
	pub fn new(config: Config, adapters: Adapters) -> RelayResult<App> {
		let broker = adapters
			.broker
			.ok_or_else(|| Error::ConfigError("no broker adapter".into()))?;
		let snapshots = adapters.snapshots;
		if config.storage.mode.persists() && snapshots.is_none() {
			return Err(Error::ConfigError(format!(
				"storage mode {:?} requires a snapshot store",
				config.storage.mode
			)));
		}
		let auth = adapters
			.auth
			.unwrap_or_else(|| Arc::new(yrelay_types::auth_adapter::AllowAll));

		Ok(Arc::new(AppState {
			config,
			broker,
			snapshots,
			auth,
			docs: DocRegistry::new(),
			cleanup: CleanupTracker::new(),
		}))
	}
}

// vim: ts=4
