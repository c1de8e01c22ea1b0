//! End-to-end relay scenarios.
//!
//! Drives document actors through their public handles, with the
//! in-process broker shared between "instances" and a filesystem snapshot
//! store. Test clients are real yrs documents speaking the sync protocol.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use yrs::sync::awareness::{AwarenessUpdate, AwarenessUpdateEntry};
use yrs::sync::{Message, SyncMessage};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, StateVector, Text, Transact, Update};

use yrelay::core::settings::ReplayConfig;
use yrelay::crdt::doc::{DocHandle, PeerId};
use yrelay::crdt::snapshot;
use yrelay::{Adapters, App, AppState, Config, StorageMode};
use yrelay_broker_adapter_memory::BrokerAdapterMemory;
use yrelay_snapshot_adapter_fs::SnapshotStoreFs;
use yrelay_types::broker_adapter::BrokerAdapter;
use yrelay_types::snapshot_adapter::SnapshotStore;

const DOC: &str = "D";

fn test_config(mode: StorageMode, snapshot_interval: u32) -> Config {
	let mut config = Config::default();
	config.storage.mode = mode;
	config.storage.snapshot_interval = snapshot_interval;
	config.replay = ReplayConfig { read_timeout_ms: 500, max_read_timeouts: 1, replay_cap_ms: 3000 };
	config
}

fn make_app(
	config: Config,
	broker: &Arc<BrokerAdapterMemory>,
	store: Option<Arc<dyn SnapshotStore>>,
) -> App {
	AppState::new(
		config,
		Adapters {
			broker: Some(broker.clone() as Arc<dyn BrokerAdapter>),
			snapshots: store,
			auth: None,
		},
	)
	.expect("app construction failed")
}

/// A connected client: a real yrs document plus the actor-side peer queue.
struct TestPeer {
	peer: PeerId,
	handle: DocHandle,
	rx: mpsc::UnboundedReceiver<Vec<u8>>,
	doc: Doc,
}

async fn connect(handle: &DocHandle) -> TestPeer {
	connect_as(handle, None).await
}

async fn connect_as(handle: &DocHandle, client_id: Option<u64>) -> TestPeer {
	let (tx, rx) = mpsc::unbounded_channel();
	let peer = handle.attach(tx).await.expect("attach failed");
	let doc = match client_id {
		Some(id) => Doc::with_client_id(id),
		None => Doc::new(),
	};
	TestPeer { peer, handle: handle.clone(), rx, doc }
}

impl TestPeer {
	/// Insert text locally and send the resulting update to the server.
	fn insert(&mut self, index: u32, chunk: &str) {
		let text = self.doc.get_or_insert_text("text");
		let update = {
			let mut txn = self.doc.transact_mut();
			text.insert(&mut txn, index, chunk);
			txn.encode_update_v1()
		};
		self.send(Message::Sync(SyncMessage::Update(update)));
	}

	fn send(&self, msg: Message) {
		self.handle.ingest(self.peer, msg.encode_v1());
	}

	fn send_raw(&self, data: Vec<u8>) {
		self.handle.ingest(self.peer, data);
	}

	/// Fold an incoming frame into the local document. Returns the decoded
	/// message.
	fn apply_frame(&mut self, frame: &[u8]) -> Message {
		let msg = Message::decode_v1(frame).expect("server sent undecodable frame");
		if let Message::Sync(SyncMessage::Update(update))
		| Message::Sync(SyncMessage::SyncStep2(update)) = &msg
		{
			let update = Update::decode_v1(update).expect("server sent undecodable update");
			let mut txn = self.doc.transact_mut();
			txn.apply_update(update).expect("server update rejected");
		}
		msg
	}

	async fn recv_frame(&mut self) -> Option<Vec<u8>> {
		tokio::time::timeout(Duration::from_secs(2), self.rx.recv()).await.ok().flatten()
	}

	async fn recv_msg(&mut self) -> Message {
		let frame = self.recv_frame().await.expect("no frame from server");
		self.apply_frame(&frame)
	}

	fn text(&self) -> String {
		let text = self.doc.get_or_insert_text("text");
		text.get_string(&self.doc.transact())
	}

	/// Pump frames until the local text matches.
	async fn wait_for_text(&mut self, expected: &str) {
		for _ in 0..64 {
			if self.text() == expected {
				return;
			}
			let Some(frame) = self.recv_frame().await else { break };
			self.apply_frame(&frame);
		}
		assert_eq!(self.text(), expected);
	}

	/// Request the server's full state.
	fn request_state(&self) {
		self.send(Message::Sync(SyncMessage::SyncStep1(StateVector::default())));
	}
}

fn sync_messages(broker: &BrokerAdapterMemory, topic: &str) -> usize {
	broker.messages(topic).iter().filter(|m| m.payload.first() == Some(&0)).count()
}

fn awareness_messages(broker: &BrokerAdapterMemory, topic: &str) -> Vec<Vec<u8>> {
	broker
		.messages(topic)
		.iter()
		.filter(|m| m.payload.first() == Some(&1))
		.map(|m| m.payload[1..].to_vec())
		.collect()
}

async fn settle() {
	tokio::time::sleep(Duration::from_millis(100)).await;
}

fn one_client_awareness(client_id: u64, json: &str) -> AwarenessUpdate {
	let mut clients = HashMap::new();
	clients.insert(client_id, AwarenessUpdateEntry { clock: 1, json: json.into() });
	AwarenessUpdate { clients }
}

// Two peers, one instance: A's edit reaches B locally and the broker sees
// exactly one sync publish.
#[tokio::test]
async fn test_two_peers_same_instance() {
	let broker = Arc::new(BrokerAdapterMemory::new());
	let app = make_app(test_config(StorageMode::None, 30), &broker, None);
	let handle = app.docs.get(&app, DOC).await.unwrap();

	let mut a = connect(&handle).await;
	let mut b = connect(&handle).await;

	// Server-initiated handshake.
	assert!(matches!(a.recv_msg().await, Message::Sync(SyncMessage::SyncStep1(_))));
	assert!(matches!(b.recv_msg().await, Message::Sync(SyncMessage::SyncStep1(_))));

	a.insert(0, "hello");
	b.wait_for_text("hello").await;

	settle().await;
	assert_eq!(sync_messages(&broker, &app.config.broker.topic(DOC)), 1);
}

// Two peers on two instances sharing the broker: the edit crosses over,
// and the receiving instance does not re-publish it.
#[tokio::test]
async fn test_two_instances_no_republish() {
	let broker = Arc::new(BrokerAdapterMemory::new());
	let app_x = make_app(test_config(StorageMode::None, 30), &broker, None);
	let app_y = make_app(test_config(StorageMode::None, 30), &broker, None);

	let hx = app_x.docs.get(&app_x, DOC).await.unwrap();
	let hy = app_y.docs.get(&app_y, DOC).await.unwrap();
	let mut a = connect(&hx).await;
	let mut b = connect(&hy).await;
	a.recv_msg().await;
	b.recv_msg().await;

	a.insert(0, "abc");
	b.wait_for_text("abc").await;

	settle().await;
	assert_eq!(sync_messages(&broker, &app_x.config.broker.topic(DOC)), 1);
}

// Snapshots survive a restart: with interval 5 and 8 edits, a fresh
// instance restores all 8 and the stored record counts at least 5.
#[tokio::test]
async fn test_snapshot_then_restart() {
	let broker = Arc::new(BrokerAdapterMemory::new());
	let dir = TempDir::new().unwrap();
	let store: Arc<dyn SnapshotStore> = Arc::new(SnapshotStoreFs::new(dir.path()));

	let app1 = make_app(test_config(StorageMode::BrokerObject, 5), &broker, Some(store.clone()));
	let handle = app1.docs.get(&app1, DOC).await.unwrap();
	let mut a = connect(&handle).await;
	a.recv_msg().await;

	let chunks = ["a", "b", "c", "d", "e", "f", "g", "h"];
	for (i, chunk) in chunks.iter().enumerate() {
		a.insert(i as u32, chunk);
	}
	a.wait_for_text("abcdefgh").await;

	// The actor folds its own publishes back from the topic and writes a
	// snapshot at the fifth fold; wait for it before stopping the instance.
	let mut stored = None;
	for _ in 0..50 {
		if let Some(raw) = store.get("snapshots/D.snapshot").await.unwrap() {
			let decoded = snapshot::decode(&raw).unwrap();
			if decoded.message_count >= 5 {
				stored = Some(decoded);
				break;
			}
		}
		settle().await;
	}
	let stored = stored.expect("no snapshot written");
	assert!(stored.message_count >= 5, "messageCount {} < 5", stored.message_count);
	app1.docs.clear().await;
	app1.cleanup.wait().await;

	// Fresh instance, fresh client.
	let app2 = make_app(test_config(StorageMode::BrokerObject, 5), &broker, Some(store.clone()));
	let handle = app2.docs.get(&app2, DOC).await.unwrap();
	let mut c = connect(&handle).await;
	c.recv_msg().await;
	c.request_state();
	c.wait_for_text("abcdefgh").await;
}

// Malformed frames are dropped without closing anything or touching state.
#[tokio::test]
async fn test_malformed_frame_tolerance() {
	let broker = Arc::new(BrokerAdapterMemory::new());
	let app = make_app(test_config(StorageMode::None, 30), &broker, None);
	let handle = app.docs.get(&app, DOC).await.unwrap();
	let mut a = connect(&handle).await;
	a.recv_msg().await;

	a.send_raw(Vec::new()); // empty
	a.send_raw(vec![0xFF]); // unknown kind
	a.send_raw(vec![0x00, 0x29]); // truncated sync body
	settle().await;

	// Still attached, still answering, still empty.
	a.request_state();
	match a.recv_msg().await {
		Message::Sync(SyncMessage::SyncStep2(_)) => {}
		other => panic!("unexpected reply: {:?}", other),
	}
	assert_eq!(a.text(), "");
	assert_eq!(sync_messages(&broker, &app.config.broker.topic(DOC)), 0);
}

// Awareness ids die with their peer: detach removes them locally and
// publishes the removal diff.
#[tokio::test]
async fn test_awareness_cleanup_on_detach() {
	let broker = Arc::new(BrokerAdapterMemory::new());
	let app = make_app(test_config(StorageMode::None, 30), &broker, None);
	let handle = app.docs.get(&app, DOC).await.unwrap();

	let mut a = connect_as(&handle, Some(42)).await;
	let mut b = connect(&handle).await;
	a.recv_msg().await;
	b.recv_msg().await;

	a.send(Message::Awareness(one_client_awareness(42, r#"{"user":"a"}"#)));

	// B observes client 42 present.
	match b.recv_msg().await {
		Message::Awareness(update) => {
			let entry = update.clients.get(&42).expect("client 42 missing");
			assert_ne!(&*entry.json, "null");
		}
		other => panic!("expected awareness, got {:?}", other),
	}

	handle.detach(a.peer);

	// B observes the removal.
	match b.recv_msg().await {
		Message::Awareness(update) => {
			let entry = update.clients.get(&42).expect("removal for 42 missing");
			assert_eq!(&*entry.json, "null");
		}
		other => panic!("expected awareness removal, got {:?}", other),
	}

	settle().await;
	let published = awareness_messages(&broker, &app.config.broker.topic(DOC));
	let removal = published
		.iter()
		.filter_map(|body| AwarenessUpdate::decode_v1(body).ok())
		.any(|update| update.clients.get(&42).is_some_and(|entry| &*entry.json == "null"));
	assert!(removal, "no awareness removal for 42 published");
}

// A corrupt snapshot is cleared and the document starts empty.
#[tokio::test]
async fn test_corrupt_snapshot_recovery() {
	let broker = Arc::new(BrokerAdapterMemory::new());
	let dir = TempDir::new().unwrap();
	let store: Arc<dyn SnapshotStore> = Arc::new(SnapshotStoreFs::new(dir.path()));
	store.put("snapshots/D.snapshot", b"not json").await.unwrap();

	let app = make_app(test_config(StorageMode::BrokerObject, 5), &broker, Some(store.clone()));
	let handle = app.docs.get(&app, DOC).await.unwrap();
	let mut a = connect(&handle).await;
	a.recv_msg().await;
	assert_eq!(a.text(), "");

	// The corrupt object is gone.
	assert!(store.get("snapshots/D.snapshot").await.unwrap().is_none());
}

// Applying the same broker sync message twice leaves the state unchanged.
#[tokio::test]
async fn test_broker_sync_is_idempotent() {
	let broker = Arc::new(BrokerAdapterMemory::new());
	let app = make_app(test_config(StorageMode::None, 30), &broker, None);
	let handle = app.docs.get(&app, DOC).await.unwrap();
	let mut a = connect(&handle).await;
	a.recv_msg().await;

	// One update, published twice as if two instances relayed it.
	let update = {
		let doc = Doc::new();
		let text = doc.get_or_insert_text("text");
		let mut txn = doc.transact_mut();
		text.insert(&mut txn, 0, "x");
		txn.encode_update_v1()
	};
	let topic = app.config.broker.topic(DOC);
	let producer = broker.create_producer(&topic, "test").await.unwrap();
	for key in ["k1", "k2"] {
		let mut payload = vec![0u8];
		payload.extend_from_slice(&update);
		producer
			.send(
				yrelay_types::broker_adapter::BrokerMessage::new(payload).with_partition_key(key),
			)
			.await
			.unwrap();
	}

	a.wait_for_text("x").await;
	settle().await;
	a.request_state();
	drain_until_step2(&mut a).await;
	assert_eq!(a.text(), "x");
}

async fn drain_until_step2(peer: &mut TestPeer) {
	loop {
		if let Message::Sync(SyncMessage::SyncStep2(_)) = peer.recv_msg().await {
			break;
		}
	}
}

// Re-sending the same awareness diff changes nothing and is not re-broadcast.
#[tokio::test]
async fn test_awareness_is_idempotent() {
	let broker = Arc::new(BrokerAdapterMemory::new());
	let app = make_app(test_config(StorageMode::None, 30), &broker, None);
	let handle = app.docs.get(&app, DOC).await.unwrap();
	let mut a = connect_as(&handle, Some(7)).await;
	let mut b = connect(&handle).await;
	a.recv_msg().await;
	b.recv_msg().await;

	let update = one_client_awareness(7, r#"{"cursor":1}"#);
	a.send(Message::Awareness(update.clone()));
	assert!(matches!(b.recv_msg().await, Message::Awareness(_)));

	a.send(Message::Awareness(update));
	let extra = tokio::time::timeout(Duration::from_millis(300), b.rx.recv()).await;
	assert!(extra.is_err(), "duplicate awareness diff was re-broadcast");
}

// Closing the last peer tears the actor down; the next get creates a fresh
// one.
#[tokio::test]
async fn test_registry_recreates_after_teardown() {
	let broker = Arc::new(BrokerAdapterMemory::new());
	let app = make_app(test_config(StorageMode::None, 30), &broker, None);

	let handle = app.docs.get(&app, DOC).await.unwrap();
	let mut a = connect(&handle).await;
	a.recv_msg().await;
	a.insert(0, "gone");
	a.wait_for_text("gone").await;

	handle.detach(a.peer);
	for _ in 0..50 {
		if app.docs.is_empty() {
			break;
		}
		settle().await;
	}
	assert!(app.docs.is_empty(), "actor not removed after last detach");

	// Storage mode none: the fresh actor starts from the topic's current
	// position, so the document is empty again.
	let handle = app.docs.get(&app, DOC).await.unwrap();
	let mut b = connect(&handle).await;
	b.recv_msg().await;
	assert_eq!(b.text(), "");
}

// Concurrent gets for one name share a single creation.
#[tokio::test]
async fn test_registry_single_creation() {
	let broker = Arc::new(BrokerAdapterMemory::new());
	let app = make_app(test_config(StorageMode::None, 30), &broker, None);

	let (h1, h2) = tokio::join!(app.docs.get(&app, DOC), app.docs.get(&app, DOC));
	let (h1, h2) = (h1.unwrap(), h2.unwrap());
	assert_eq!(app.docs.len(), 1);

	// Both handles reach the same actor: an edit through one is visible
	// through the other.
	let mut a = connect(&h1).await;
	let mut b = connect(&h2).await;
	a.recv_msg().await;
	b.recv_msg().await;
	a.insert(0, "shared");
	b.wait_for_text("shared").await;
}
