//! Broker connection supervisor.
//!
//! Owns the health of the shared broker client. The probe opens a
//! short-lived producer on a dedicated health-check topic, sends one byte
//! and closes it. A failed probe triggers a rebuild: reconnect the client
//! and destroy every document actor, whose broker handles the rebuild
//! invalidated. Rebuilds are serialised by a mutex so at most one is in
//! flight.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::prelude::*;

use yrelay_types::broker_adapter::BrokerMessage;
use yrelay_types::utils::random_id;

pub const PROBE_INTERVAL: Duration = Duration::from_secs(30);

pub struct BrokerSupervisor {
	app: App,
	rebuild_lock: Mutex<()>,
}

impl BrokerSupervisor {
	pub fn new(app: App) -> Arc<Self> {
		Arc::new(Self { app, rebuild_lock: Mutex::new(()) })
	}

	/// Run the probe loop until the task is aborted.
	pub fn spawn(app: App, interval: Duration) -> JoinHandle<()> {
		let supervisor = Self::new(app);
		tokio::spawn(async move {
			loop {
				tokio::time::sleep(interval).await;
				if let Err(e) = supervisor.probe().await {
					warn!("broker health probe failed: {}", e);
					supervisor.rebuild().await;
				}
			}
		})
	}

	/// One health probe round trip.
	pub async fn probe(&self) -> RelayResult<()> {
		let topic = self.app.config.broker.health_topic();
		let producer = self
			.app
			.broker
			.create_producer(&topic, &format!("health-{}", random_id()))
			.await?;
		producer.send(BrokerMessage::new(vec![0])).await?;
		if let Err(e) = producer.close().await {
			debug!("health probe producer close: {}", e);
		}
		Ok(())
	}

	/// Rebuild the broker client and destroy all actors. Single-flight.
	pub async fn rebuild(&self) {
		let _guard = self.rebuild_lock.lock().await;
		info!("rebuilding broker connection");
		if let Err(e) = self.app.broker.reconnect().await {
			warn!("broker reconnect failed: {}", e);
			return;
		}
		// Every producer/consumer/reader opened before the rebuild is
		// invalid now; drop the actors and let demand recreate them.
		self.app.docs.clear().await;
	}
}

// vim: ts=4
