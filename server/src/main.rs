//! yrelay server binary.
//!
//! Wires concrete adapters into the engine: the in-process broker backend,
//! a snapshot store picked by configuration (S3-compatible endpoint when
//! one is configured, local filesystem otherwise), and the allow-all auth
//! strategy. Configuration comes from an optional YAML file
//! (`YRELAY_CONFIG` or the first argument) with environment overrides.
//!
//! TERM, INT and HUP trigger graceful shutdown: stop accepting, close every
//! document actor, await in-flight tear-down, close the broker client. The
//! whole sequence is capped; exceeding the cap forces exit code 1.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use yrelay::crdt::supervisor::{BrokerSupervisor, PROBE_INTERVAL};
use yrelay::{Adapters, AppState, Config, StorageMode};
use yrelay_broker_adapter_memory::BrokerAdapterMemory;
use yrelay_snapshot_adapter_fs::SnapshotStoreFs;
use yrelay_snapshot_adapter_s3::{SnapshotStoreS3, StoreConfig};
use yrelay_types::error::RelayResult;
use yrelay_types::snapshot_adapter::SnapshotStore;

const SHUTDOWN_CAP: Duration = Duration::from_secs(30);

fn main() {
	let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
		Ok(runtime) => runtime,
		Err(e) => {
			eprintln!("failed to start runtime: {}", e);
			std::process::exit(1);
		}
	};
	let code = runtime.block_on(run());
	std::process::exit(code);
}

async fn run() -> i32 {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_target(false)
		.init();

	let config_path = std::env::var("YRELAY_CONFIG")
		.ok()
		.or_else(|| std::env::args().nth(1))
		.map(PathBuf::from);
	let config = match Config::load(config_path.as_deref()) {
		Ok(config) => config,
		Err(e) => {
			error!("configuration error: {}", e);
			return 1;
		}
	};

	let app = match build_app(config) {
		Ok(app) => app,
		Err(e) => {
			error!("startup failed: {}", e);
			return 1;
		}
	};

	let listener = match tokio::net::TcpListener::bind(app.config.listen.as_ref()).await {
		Ok(listener) => listener,
		Err(e) => {
			error!("cannot listen on {}: {}", app.config.listen, e);
			return 1;
		}
	};
	info!("listening on {} (v{})", app.config.listen, yrelay::core::app::VERSION);

	let supervisor = BrokerSupervisor::spawn(app.clone(), PROBE_INTERVAL);

	let router = yrelay::router(app.clone());
	let serve = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
	let served = serve.await;

	supervisor.abort();
	if let Err(e) = served {
		error!("server error: {}", e);
		return 1;
	}

	info!("shutting down");
	match tokio::time::timeout(SHUTDOWN_CAP, shutdown(&app)).await {
		Ok(()) => {
			info!("shutdown complete");
			0
		}
		Err(_) => {
			error!("shutdown exceeded {:?}, forcing exit", SHUTDOWN_CAP);
			1
		}
	}
}

fn build_app(config: Config) -> RelayResult<yrelay::App> {
	let snapshots: Option<Arc<dyn SnapshotStore>> = match config.storage.mode {
		StorageMode::None => None,
		_ => Some(build_store(&config)),
	};

	AppState::new(
		config,
		Adapters {
			broker: Some(Arc::new(BrokerAdapterMemory::new())),
			snapshots,
			auth: None, // allow-all
		},
	)
}

fn build_store(config: &Config) -> Arc<dyn SnapshotStore> {
	match (&config.store.bucket, &config.store.access_key, &config.store.secret_key) {
		(Some(bucket), Some(access_key), Some(secret_key)) => {
			info!("using S3 snapshot store (bucket {})", bucket);
			Arc::new(SnapshotStoreS3::new(StoreConfig {
				endpoint: config.store.endpoint.as_deref().map(str::to_owned),
				bucket: bucket.to_string(),
				access_key: access_key.to_string(),
				secret_key: secret_key.to_string(),
				region: config.store.region.as_deref().map(str::to_owned),
			}))
		}
		_ => {
			let root = std::env::var("YRELAY_DATA_DIR").unwrap_or_else(|_| "./data".to_owned());
			info!("using filesystem snapshot store ({})", root);
			Arc::new(SnapshotStoreFs::new(root))
		}
	}
}

async fn shutdown(app: &yrelay::App) {
	app.docs.clear().await;
	let failures = app.cleanup.wait().await;
	if failures > 0 {
		warn!("{} cleanup tasks failed", failures);
	}
	if let Err(e) = app.broker.close().await {
		warn!("broker close failed: {}", e);
	}
}

async fn shutdown_signal() {
	use tokio::signal::unix::{signal, SignalKind};

	let mut term = match signal(SignalKind::terminate()) {
		Ok(term) => term,
		Err(e) => {
			error!("cannot install TERM handler: {}", e);
			return std::future::pending::<()>().await;
		}
	};
	let mut hangup = match signal(SignalKind::hangup()) {
		Ok(hangup) => hangup,
		Err(e) => {
			error!("cannot install HUP handler: {}", e);
			return std::future::pending::<()>().await;
		}
	};

	tokio::select! {
		_ = tokio::signal::ctrl_c() => info!("received INT"),
		_ = term.recv() => info!("received TERM"),
		_ = hangup.recv() => info!("received HUP"),
	}
}

// vim: ts=4
