//! Document actor.
//!
//! One tokio task per document owns the Yjs document, the awareness state
//! and the peer map, and relays every frame between local peers and the
//! document's broker topic. All mutations flow through the actor's command
//! channel, so the origin of every apply is explicit: frames that came in
//! from the broker are broadcast locally but never published back. That is
//! the loop-breaker that keeps traffic from oscillating between instances.
//!
//! Lifecycle: restore (snapshot + bounded topic replay, depending on the
//! storage mode), open producer and consumer, serve, tear down when the
//! last peer detaches or the actor is closed. Restore steps are retried a
//! bounded number of times; a creation failure propagates to every caller
//! waiting on the registry.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use yrs::sync::{Awareness, AwarenessUpdate, Message, SyncMessage};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

use crate::crdt::frame::{
	decode_broker_payload, decode_socket_frame, encode_broker_payload, encode_socket_frame,
	sync_update_frame, FrameKind,
};
use crate::crdt::snapshot::{self, Snapshot};
use crate::prelude::*;

use yrelay_types::broker_adapter::{
	BrokerConsumer, BrokerMessage, BrokerProducer, BrokerReader, MessageId, ReaderOptions,
	ReaderStart, PROP_DOC_NAME, PROP_MESSAGE_TYPE,
};
use yrelay_types::snapshot_adapter::snapshot_key;
use yrelay_types::utils::random_id;

const INIT_ATTEMPTS: u32 = 3;
const INIT_BACKOFF: Duration = Duration::from_secs(1);

static NEXT_ACTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one attached peer within its actor.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PeerId(u64);

impl std::fmt::Display for PeerId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Where an apply came from. `Broker` applies are never re-published.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Origin {
	Peer(PeerId),
	Broker,
}

impl Origin {
	fn peer(self) -> Option<PeerId> {
		match self {
			Origin::Peer(peer) => Some(peer),
			Origin::Broker => None,
		}
	}
}

pub(crate) enum DocCommand {
	Attach {
		outbound: mpsc::UnboundedSender<Vec<u8>>,
		reply: oneshot::Sender<PeerId>,
	},
	FromPeer {
		peer: PeerId,
		data: Vec<u8>,
	},
	FromBroker {
		kind: FrameKind,
		body: Vec<u8>,
		id: MessageId,
		done: oneshot::Sender<()>,
	},
	Detach {
		peer: PeerId,
	},
	Close {
		reply: oneshot::Sender<()>,
	},
}

/// Cheap clonable handle onto a document actor.
#[derive(Clone, Debug)]
pub struct DocHandle {
	name: Arc<str>,
	actor_id: u64,
	tx: mpsc::UnboundedSender<DocCommand>,
}

impl DocHandle {
	pub fn name(&self) -> &str {
		&self.name
	}

	pub(crate) fn actor_id(&self) -> u64 {
		self.actor_id
	}

	/// Add a peer. The actor queues the initial handshake (sync step 1 and,
	/// when non-empty, the full awareness snapshot) onto `outbound` before
	/// returning the peer id.
	pub async fn attach(&self, outbound: mpsc::UnboundedSender<Vec<u8>>) -> RelayResult<PeerId> {
		let (reply, rx) = oneshot::channel();
		self.tx
			.send(DocCommand::Attach { outbound, reply })
			.map_err(|_| Error::Internal("document actor is gone".into()))?;
		rx.await.map_err(|_| Error::Internal("document actor is gone".into()))
	}

	/// Feed one binary socket frame from `peer`. Malformed frames are
	/// logged and dropped by the actor; they never close the connection.
	pub fn ingest(&self, peer: PeerId, data: Vec<u8>) {
		if self.tx.send(DocCommand::FromPeer { peer, data }).is_err() {
			debug!("frame for closed document {} dropped", self.name);
		}
	}

	/// Remove a peer. Idempotent; detaching the last peer tears the actor
	/// down.
	pub fn detach(&self, peer: PeerId) {
		let _ = self.tx.send(DocCommand::Detach { peer });
	}

	/// Close the actor and wait for its tear-down. Idempotent.
	pub async fn close(&self) {
		let (reply, rx) = oneshot::channel();
		if self.tx.send(DocCommand::Close { reply }).is_ok() {
			let _ = rx.await;
		}
	}
}

struct PeerRecord {
	outbound: mpsc::UnboundedSender<Vec<u8>>,
	/// Awareness client ids this peer controls, for removal on detach.
	awareness_ids: HashSet<u64>,
}

pub(crate) struct DocActor {
	app: App,
	name: Arc<str>,
	actor_id: u64,
	awareness: Awareness,
	peers: HashMap<PeerId, PeerRecord>,
	next_peer: u64,
	producer: Box<dyn BrokerProducer>,
	consumer_task: Option<JoinHandle<()>>,
	shutdown: watch::Sender<bool>,

	/// Running count of broker messages folded into the state.
	message_count: u64,
	/// Id of the last folded broker message.
	checkpoint: Option<MessageId>,
	/// Folded messages since the last snapshot write.
	since_snapshot: u64,
}

impl DocActor {
	/// Restore state, open broker handles and start the actor task.
	pub(crate) async fn spawn(app: App, name: &str) -> RelayResult<DocHandle> {
		let name: Arc<str> = Arc::from(name);
		let topic = app.config.broker.topic(&name);
		let mode = app.config.storage.mode;
		debug!("creating document actor: {}", name);

		let awareness = Awareness::new(Doc::new());
		let mut message_count = 0u64;
		let mut checkpoint: Option<MessageId> = None;
		let mut since_snapshot = 0u64;

		if mode.persists() {
			if let Some((restored_checkpoint, restored_count)) =
				load_snapshot(&app, &name, &awareness).await?
			{
				checkpoint = Some(restored_checkpoint);
				message_count = restored_count;
			}
		}

		if mode.replays() {
			let folded = replay(&app, &name, &topic, &awareness, &mut checkpoint).await?;
			message_count += folded;
			since_snapshot = folded;
			if since_snapshot >= u64::from(app.config.storage.snapshot_interval) {
				if let Err(e) =
					write_snapshot(&app, &name, &awareness, &checkpoint, message_count).await
				{
					warn!("post-replay snapshot failed for {}: {}", name, e);
				}
				since_snapshot = 0;
			}
		}

		let producer = open_producer(&app, &name, &topic).await?;
		let consumer = match open_consumer(&app, &name, &topic).await {
			Ok(consumer) => consumer,
			Err(e) => {
				// Release the producer on the failed-construction path.
				if let Err(close_err) = producer.close().await {
					debug!("producer close for {}: {}", name, close_err);
				}
				return Err(e);
			}
		};

		let (tx, rx) = mpsc::unbounded_channel();
		let (shutdown, shutdown_rx) = watch::channel(false);
		let actor_id = NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed);

		let consumer_task =
			tokio::spawn(consumer_loop(name.clone(), consumer, tx.clone(), shutdown_rx));

		let actor = DocActor {
			app: app.clone(),
			name: name.clone(),
			actor_id,
			awareness,
			peers: HashMap::new(),
			next_peer: 1,
			producer,
			consumer_task: Some(consumer_task),
			shutdown,
			message_count,
			checkpoint,
			since_snapshot,
		};
		app.cleanup.spawn(actor.run(rx));

		info!("document actor running: {}", name);
		Ok(DocHandle { name, actor_id, tx })
	}

	async fn run(mut self, mut rx: mpsc::UnboundedReceiver<DocCommand>) -> RelayResult<()> {
		let mut close_replies: Vec<oneshot::Sender<()>> = Vec::new();

		while let Some(cmd) = rx.recv().await {
			match cmd {
				DocCommand::Attach { outbound, reply } => {
					let peer = self.attach(outbound);
					let _ = reply.send(peer);
				}
				DocCommand::FromPeer { peer, data } => {
					self.from_peer(peer, &data).await;
				}
				DocCommand::FromBroker { kind, body, id, done } => {
					self.from_broker(kind, &body, id).await;
					let _ = done.send(());
				}
				DocCommand::Detach { peer } => {
					let removed = self.detach(peer).await;
					if removed && self.peers.is_empty() {
						debug!("last peer left {}, tearing down", self.name);
						self.app.docs.remove(&self.name, self.actor_id);
						break;
					}
				}
				DocCommand::Close { reply } => {
					self.app.docs.remove(&self.name, self.actor_id);
					close_replies.push(reply);
					break;
				}
			}
		}

		self.teardown().await;

		// Resolve close() callers that raced the tear-down.
		rx.close();
		while let Ok(cmd) = rx.try_recv() {
			if let DocCommand::Close { reply } = cmd {
				close_replies.push(reply);
			}
		}
		for reply in close_replies {
			let _ = reply.send(());
		}
		Ok(())
	}

	fn attach(&mut self, outbound: mpsc::UnboundedSender<Vec<u8>>) -> PeerId {
		let peer = PeerId(self.next_peer);
		self.next_peer += 1;
		self.peers.insert(peer, PeerRecord { outbound, awareness_ids: HashSet::new() });

		// Server-initiated handshake: sync step 1 from the current state,
		// then the full awareness snapshot when there is one.
		let sv = self.awareness.doc().transact().state_vector();
		self.send_to(peer, encode_socket_frame(&Message::Sync(SyncMessage::SyncStep1(sv))));
		self.send_awareness_snapshot(peer);

		debug!("peer {} attached to {} ({} peers)", peer, self.name, self.peers.len());
		peer
	}

	async fn detach(&mut self, peer: PeerId) -> bool {
		let Some(record) = self.peers.remove(&peer) else { return false };
		debug!("peer {} detached from {} ({} peers)", peer, self.name, self.peers.len());

		let ids: Vec<u64> = record.awareness_ids.into_iter().collect();
		if ids.is_empty() {
			return true;
		}
		for id in &ids {
			self.awareness.remove_state(*id);
		}
		// The removal is local-originated: broadcast and publish so remote
		// instances drop these client ids too.
		match self.awareness.update_with_clients(ids) {
			Ok(update) => {
				self.broadcast(encode_socket_frame(&Message::Awareness(update.clone())), None);
				self.publish(FrameKind::Awareness, &update.encode_v1()).await;
			}
			Err(e) => warn!("awareness removal diff failed for {}: {}", self.name, e),
		}
		true
	}

	async fn from_peer(&mut self, peer: PeerId, data: &[u8]) {
		let msg = match decode_socket_frame(data) {
			Ok(msg) => msg,
			Err(e) => {
				warn!("dropping bad frame from peer {} on {}: {}", peer, self.name, e);
				return;
			}
		};
		match msg {
			Message::Sync(SyncMessage::SyncStep1(sv)) => {
				let diff = self.awareness.doc().transact().encode_diff_v1(&sv);
				self.send_to(
					peer,
					encode_socket_frame(&Message::Sync(SyncMessage::SyncStep2(diff))),
				);
			}
			Message::Sync(SyncMessage::SyncStep2(update))
			| Message::Sync(SyncMessage::Update(update)) => {
				self.apply_sync(Origin::Peer(peer), &update).await;
			}
			Message::Awareness(update) => {
				self.apply_awareness(Origin::Peer(peer), update).await;
			}
			Message::AwarenessQuery => {
				self.send_awareness_snapshot(peer);
			}
			other => {
				debug!("ignoring message from peer {} on {}: {:?}", peer, self.name, other);
			}
		}
	}

	async fn from_broker(&mut self, kind: FrameKind, body: &[u8], id: MessageId) {
		match kind {
			FrameKind::Sync => {
				self.apply_sync(Origin::Broker, body).await;
				self.message_count += 1;
				self.since_snapshot += 1;
				self.checkpoint = Some(id);
				if self.app.config.storage.mode.persists()
					&& self.since_snapshot >= u64::from(self.app.config.storage.snapshot_interval)
				{
					if let Err(e) = write_snapshot(
						&self.app,
						&self.name,
						&self.awareness,
						&self.checkpoint,
						self.message_count,
					)
					.await
					{
						warn!("snapshot failed for {}: {}", self.name, e);
					}
					self.since_snapshot = 0;
				}
			}
			FrameKind::Awareness => match AwarenessUpdate::decode_v1(body) {
				Ok(update) => self.apply_awareness(Origin::Broker, update).await,
				Err(e) => warn!("undecodable awareness message for {}: {}", self.name, e),
			},
		}
	}

	/// Apply a raw CRDT update: mutate the document, fan out to local peers
	/// other than the origin, and publish to the broker unless the update
	/// itself came from the broker.
	async fn apply_sync(&mut self, origin: Origin, update_bytes: &[u8]) {
		let update = match Update::decode_v1(update_bytes) {
			Ok(update) => update,
			Err(e) => {
				warn!("undecodable update ({:?}) for {}: {}", origin, self.name, e);
				return;
			}
		};
		{
			let doc = self.awareness.doc();
			let mut txn = doc.transact_mut();
			if let Err(e) = txn.apply_update(update) {
				warn!("update rejected ({:?}) for {}: {}", origin, self.name, e);
				return;
			}
		}
		self.broadcast(sync_update_frame(update_bytes), origin.peer());
		if origin != Origin::Broker {
			self.publish(FrameKind::Sync, update_bytes).await;
		}
	}

	/// Apply an awareness diff, track which client ids the originating peer
	/// controls, fan out, and publish unless broker-originated.
	async fn apply_awareness(&mut self, origin: Origin, update: AwarenessUpdate) {
		let summary = match self.awareness.apply_update_summary(update.clone()) {
			Ok(summary) => summary,
			Err(e) => {
				warn!("awareness update rejected ({:?}) for {}: {}", origin, self.name, e);
				return;
			}
		};
		let Some(summary) = summary else {
			// Duplicate delivery; awareness is idempotent.
			return;
		};

		if let Origin::Peer(peer) = origin {
			if let Some(record) = self.peers.get_mut(&peer) {
				for id in summary.added.iter().chain(summary.updated.iter()) {
					record.awareness_ids.insert(*id);
				}
				for id in &summary.removed {
					record.awareness_ids.remove(id);
				}
			}
		}

		self.broadcast(encode_socket_frame(&Message::Awareness(update.clone())), origin.peer());
		if origin != Origin::Broker {
			self.publish(FrameKind::Awareness, &update.encode_v1()).await;
		}
	}

	fn send_awareness_snapshot(&self, peer: PeerId) {
		match self.awareness.update() {
			Ok(update) if !update.clients.is_empty() => {
				self.send_to(peer, encode_socket_frame(&Message::Awareness(update)));
			}
			Ok(_) => {}
			Err(e) => warn!("awareness snapshot failed for {}: {}", self.name, e),
		}
	}

	fn send_to(&self, peer: PeerId, frame: Vec<u8>) {
		if let Some(record) = self.peers.get(&peer) {
			if record.outbound.send(frame).is_err() {
				debug!("peer {} on {} is gone, frame dropped", peer, self.name);
			}
		}
	}

	fn broadcast(&self, frame: Vec<u8>, exclude: Option<PeerId>) {
		for (peer, record) in &self.peers {
			if Some(*peer) == exclude {
				continue;
			}
			if record.outbound.send(frame.clone()).is_err() {
				debug!("peer {} on {} is gone, frame dropped", peer, self.name);
			}
		}
	}

	/// Publish one broker message. Fire-and-forget: peers already received
	/// the frame locally, and a missed publish re-converges through
	/// snapshot + replay once any client reconnects.
	async fn publish(&self, kind: FrameKind, body: &[u8]) {
		let partition_key = match kind {
			// Every sync update must survive compaction.
			FrameKind::Sync => format!("{}-{}", self.name, random_id()),
			// Presence bursts may collapse to the latest diff.
			FrameKind::Awareness => format!("{}-awareness", self.name),
		};
		let msg = BrokerMessage::new(encode_broker_payload(kind, body))
			.with_partition_key(partition_key)
			.with_property(PROP_MESSAGE_TYPE, kind.message_type())
			.with_property(PROP_DOC_NAME, self.name.as_ref());
		if let Err(e) = self.producer.send(msg).await {
			warn!("broker publish failed for {}: {}", self.name, e);
		}
	}

	async fn teardown(&mut self) {
		let _ = self.shutdown.send(true);
		if let Some(task) = self.consumer_task.take() {
			if let Err(e) = task.await {
				warn!("consumer task for {} ended abnormally: {}", self.name, e);
			}
		}
		if self.app.config.storage.mode.persists() && self.since_snapshot > 0 {
			if let Err(e) = write_snapshot(
				&self.app,
				&self.name,
				&self.awareness,
				&self.checkpoint,
				self.message_count,
			)
			.await
			{
				warn!("final snapshot failed for {}: {}", self.name, e);
			}
		}
		if let Err(e) = self.producer.close().await {
			debug!("producer close for {}: {}", self.name, e);
		}
		info!("document actor closed: {}", self.name);
	}
}

/// Broker ingress loop. Owns the consumer; validates, hands the message to
/// the actor, waits for the apply, then acknowledges. Exits when the
/// consumer disconnects or the actor shuts down, and closes the consumer on
/// the way out.
async fn consumer_loop(
	name: Arc<str>,
	mut consumer: Box<dyn BrokerConsumer>,
	actor: mpsc::UnboundedSender<DocCommand>,
	mut shutdown: watch::Receiver<bool>,
) {
	loop {
		let msg = tokio::select! {
			_ = shutdown.changed() => break,
			res = consumer.receive() => match res {
				Ok(msg) => msg,
				Err(e) if e.is_disconnect() => {
					debug!("consumer for {} disconnected: {}", name, e);
					break;
				}
				Err(e) => {
					warn!("broker receive failed for {}: {}", name, e);
					continue;
				}
			},
		};

		let (kind, body) = match decode_broker_payload(&msg.payload) {
			Ok(split) => split,
			Err(e) => {
				warn!("dropping invalid broker message for {}: {}", name, e);
				let _ = consumer.ack(&msg.id).await;
				continue;
			}
		};

		let (done, done_rx) = oneshot::channel();
		let cmd = DocCommand::FromBroker {
			kind,
			body: body.to_vec(),
			id: msg.id.clone(),
			done,
		};
		if actor.send(cmd).is_err() {
			break;
		}
		tokio::select! {
			_ = shutdown.changed() => break,
			_ = done_rx => {}
		}

		if let Err(e) = consumer.ack(&msg.id).await {
			warn!("ack failed for {}: {}", name, e);
			if e.is_disconnect() {
				break;
			}
		}
	}
	if let Err(e) = consumer.close().await {
		debug!("consumer close for {}: {}", name, e);
	}
}

/// Retry transient failures during actor creation. Validation errors are
/// not transient and surface immediately.
async fn with_retries<T, F, Fut>(what: &str, name: &str, mut op: F) -> RelayResult<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = RelayResult<T>>,
{
	let mut attempt = 1;
	loop {
		match op().await {
			Ok(value) => return Ok(value),
			Err(e @ Error::ValidationError(_)) => return Err(e),
			Err(e) if attempt < INIT_ATTEMPTS => {
				warn!("{} for {} failed (attempt {}): {}", what, name, attempt, e);
				tokio::time::sleep(INIT_BACKOFF).await;
				attempt += 1;
			}
			Err(e) => {
				warn!("{} for {} failed permanently: {}", what, name, e);
				return Err(e);
			}
		}
	}
}

/// Load and apply the document snapshot. Returns the restored checkpoint
/// and message count, or `None` when there is nothing (or nothing usable)
/// to restore. Malformed records are cleared so the next start is clean.
async fn load_snapshot(
	app: &App,
	name: &Arc<str>,
	awareness: &Awareness,
) -> RelayResult<Option<(MessageId, u64)>> {
	let Some(store) = app.snapshots.clone() else { return Ok(None) };
	let key = snapshot_key(name);

	let data = with_retries("snapshot load", name, || {
		let store = store.clone();
		let key = key.clone();
		async move { store.get(&key).await }
	})
	.await?;
	let Some(data) = data else {
		debug!("no snapshot for {}", name);
		return Ok(None);
	};

	let snapshot = match snapshot::decode(&data) {
		Ok(snapshot) => snapshot,
		Err(_) => {
			warn!("snapshot malformed for {}, clearing", name);
			clear_snapshot(app, name).await;
			return Ok(None);
		}
	};
	match apply_state(awareness, &snapshot) {
		Ok(()) => {
			debug!("restored snapshot for {} ({} messages)", name, snapshot.message_count);
			Ok(Some((snapshot.checkpoint, snapshot.message_count)))
		}
		Err(e) => {
			warn!("snapshot state unusable for {} ({}), clearing", name, e);
			clear_snapshot(app, name).await;
			Ok(None)
		}
	}
}

fn apply_state(awareness: &Awareness, snapshot: &Snapshot) -> RelayResult<()> {
	let update = Update::decode_v1(&snapshot.state)
		.map_err(|e| Error::ValidationError(format!("undecodable state: {}", e)))?;
	let doc = awareness.doc();
	let mut txn = doc.transact_mut();
	txn.apply_update(update)
		.map_err(|e| Error::ValidationError(format!("unappliable state: {}", e)))
}

async fn clear_snapshot(app: &App, name: &str) {
	let Some(store) = &app.snapshots else { return };
	if let Err(e) = store.delete(&snapshot_key(name)).await {
		warn!("failed to clear snapshot for {}: {}", name, e);
	}
}

/// Fold retained topic history into the document. Bounded three ways: the
/// snapshot-interval fold target, consecutive read timeouts, and a
/// wall-clock cap. Awareness messages are ephemeral and skipped.
async fn replay(
	app: &App,
	name: &Arc<str>,
	topic: &str,
	awareness: &Awareness,
	checkpoint: &mut Option<MessageId>,
) -> RelayResult<u64> {
	let interval = u64::from(app.config.storage.snapshot_interval);
	let replay_cfg = app.config.replay.clone();

	let mut reader = match open_reader(app, name, topic, checkpoint.clone()).await {
		Ok(reader) => reader,
		Err(Error::ValidationError(msg)) if checkpoint.is_some() => {
			// The broker no longer understands the stored checkpoint.
			warn!("checkpoint rejected for {} ({}), replaying from earliest", name, msg);
			clear_snapshot(app, name).await;
			*checkpoint = None;
			open_reader(app, name, topic, None).await?
		}
		Err(e) => return Err(e),
	};

	let deadline = Instant::now() + replay_cfg.replay_cap();
	let mut folded = 0u64;
	let mut timeouts = 0u32;

	while folded < interval && timeouts < replay_cfg.max_read_timeouts && Instant::now() < deadline
	{
		match reader.read_next(replay_cfg.read_timeout()).await {
			Ok(Some(msg)) => {
				timeouts = 0;
				match decode_broker_payload(&msg.payload) {
					Ok((FrameKind::Sync, body)) => match Update::decode_v1(body) {
						Ok(update) => {
							let apply = {
								let doc = awareness.doc();
								let mut txn = doc.transact_mut();
								txn.apply_update(update)
							};
							match apply {
								Ok(()) => {
									folded += 1;
									*checkpoint = Some(msg.id);
								}
								Err(e) => {
									warn!("skipping unappliable replay update for {}: {}", name, e);
								}
							}
						}
						Err(e) => warn!("skipping undecodable replay update for {}: {}", name, e),
					},
					Ok((FrameKind::Awareness, _)) => {}
					Err(e) => warn!("skipping invalid replay message for {}: {}", name, e),
				}
			}
			Ok(None) => timeouts += 1,
			Err(e) => {
				warn!("replay read failed for {}: {}", name, e);
				break;
			}
		}
	}

	if let Err(e) = reader.close().await {
		debug!("replay reader close for {}: {}", name, e);
	}
	debug!("replay for {} folded {} messages", name, folded);
	Ok(folded)
}

async fn open_reader(
	app: &App,
	name: &str,
	topic: &str,
	checkpoint: Option<MessageId>,
) -> RelayResult<Box<dyn BrokerReader>> {
	with_retries("reader open", name, || {
		let broker = app.broker.clone();
		let topic = topic.to_owned();
		let start = match &checkpoint {
			Some(id) => ReaderStart::Checkpoint(id.clone()),
			None => ReaderStart::Earliest,
		};
		async move {
			broker.create_reader(&topic, ReaderOptions { start, compacted: true }).await
		}
	})
	.await
}

async fn open_producer(
	app: &App,
	name: &Arc<str>,
	topic: &str,
) -> RelayResult<Box<dyn BrokerProducer>> {
	with_retries("producer open", name, || {
		let broker = app.broker.clone();
		let topic = topic.to_owned();
		// Producer names are unique per open.
		let producer_name = format!("{}-{}", name, random_id());
		async move { broker.create_producer(&topic, &producer_name).await }
	})
	.await
}

async fn open_consumer(
	app: &App,
	name: &Arc<str>,
	topic: &str,
) -> RelayResult<Box<dyn BrokerConsumer>> {
	let subscription = app.config.broker.subscription(name);
	with_retries("consumer open", name, || {
		let broker = app.broker.clone();
		let topic = topic.to_owned();
		let subscription = subscription.clone();
		async move { broker.subscribe(&topic, &subscription).await }
	})
	.await
}

/// Write the current state as a snapshot. Skipped while no broker message
/// has been folded yet: without a checkpoint there is nothing to anchor a
/// replay on, and the state is still reproducible from the topic itself.
async fn write_snapshot(
	app: &App,
	name: &str,
	awareness: &Awareness,
	checkpoint: &Option<MessageId>,
	message_count: u64,
) -> RelayResult<()> {
	let Some(store) = &app.snapshots else { return Ok(()) };
	let Some(checkpoint) = checkpoint else {
		debug!("no checkpoint for {} yet, snapshot skipped", name);
		return Ok(());
	};
	let state = {
		let doc = awareness.doc();
		let txn = doc.transact();
		txn.encode_state_as_update_v1(&StateVector::default())
	};
	let snapshot = Snapshot {
		state,
		checkpoint: checkpoint.clone(),
		message_count,
		timestamp: Timestamp::now(),
	};
	store.put(&snapshot_key(name), &snapshot::encode(&snapshot)?).await?;
	debug!("snapshot written for {} ({} messages)", name, message_count);
	Ok(())
}

// vim: ts=4
