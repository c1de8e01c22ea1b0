//! In-process broker backend.
//!
//! Implements the yrelay broker traits over shared memory with
//! Pulsar-family semantics:
//!
//! - Each topic is an append-only ledger of messages; message ids encode
//!   the ledger offset in 8 big-endian bytes.
//! - Every `subscribe` call returns an independent consumer that observes
//!   the full message flow from the moment of subscription. The relay opens
//!   one consumer per document per process, so fan-out across instances is
//!   preserved; brokers whose shared subscriptions load-balance across
//!   identically-named subscriptions need a per-instance suffix instead.
//! - Readers replay the retained ledger from earliest or from a
//!   checkpoint, optionally through a compacted view that keeps only the
//!   latest message per partition key (messages without a key are always
//!   kept).
//!
//! A process-wide connection flag stands in for the broker session:
//! flipping it makes every handle fail the way a dropped Pulsar connection
//! would, which is what the connection supervisor tests drive.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use yrelay_types::broker_adapter::{
	BrokerAdapter, BrokerConsumer, BrokerMessage, BrokerProducer, BrokerReader, MessageId,
	ReaderOptions, ReaderStart, ReceivedMessage,
};
use yrelay_types::error::{Error, RelayResult};

/// One retained message.
#[derive(Clone, Debug)]
pub struct StoredMessage {
	pub offset: u64,
	pub payload: Vec<u8>,
	pub partition_key: Option<String>,
	pub properties: HashMap<String, String>,
}

impl StoredMessage {
	fn received(&self) -> ReceivedMessage {
		ReceivedMessage {
			id: encode_message_id(self.offset),
			payload: self.payload.clone(),
			partition_key: self.partition_key.clone(),
		}
	}
}

pub fn encode_message_id(offset: u64) -> MessageId {
	MessageId::from_bytes(offset.to_be_bytes().to_vec())
}

pub fn decode_message_id(id: &MessageId) -> RelayResult<u64> {
	let bytes: [u8; 8] = id
		.as_bytes()
		.try_into()
		.map_err(|_| Error::ValidationError("invalid checkpoint id".into()))?;
	Ok(u64::from_be_bytes(bytes))
}

#[derive(Debug)]
struct Topic {
	messages: RwLock<Vec<StoredMessage>>,
	/// Ledger length, bumped on every append; consumers and readers wait on
	/// it.
	len_tx: watch::Sender<u64>,
}

impl Topic {
	fn new() -> Arc<Self> {
		let (len_tx, _) = watch::channel(0);
		Arc::new(Self { messages: RwLock::new(Vec::new()), len_tx })
	}

	fn append(&self, msg: BrokerMessage) -> RelayResult<u64> {
		let mut messages = self
			.messages
			.write()
			.map_err(|_| Error::Internal("topic ledger lock poisoned".into()))?;
		let offset = messages.len() as u64;
		messages.push(StoredMessage {
			offset,
			payload: msg.payload,
			partition_key: msg.partition_key,
			properties: msg.properties,
		});
		let _ = self.len_tx.send(messages.len() as u64);
		Ok(offset)
	}

	fn read_at(&self, offset: u64) -> RelayResult<Option<StoredMessage>> {
		let messages = self
			.messages
			.read()
			.map_err(|_| Error::Internal("topic ledger lock poisoned".into()))?;
		Ok(messages.get(offset as usize).cloned())
	}
}

#[derive(Debug)]
pub struct BrokerAdapterMemory {
	topics: DashMap<Box<str>, Arc<Topic>>,
	connected: Arc<AtomicBool>,
}

impl Default for BrokerAdapterMemory {
	fn default() -> Self {
		Self::new()
	}
}

impl BrokerAdapterMemory {
	pub fn new() -> Self {
		Self { topics: DashMap::new(), connected: Arc::new(AtomicBool::new(true)) }
	}

	fn topic(&self, name: &str) -> Arc<Topic> {
		self.topics.entry(name.into()).or_insert_with(Topic::new).clone()
	}

	fn ensure_connected(&self) -> RelayResult<()> {
		if self.connected.load(Ordering::SeqCst) {
			Ok(())
		} else {
			Err(Error::BrokerDisconnected)
		}
	}

	/// Drop or restore the simulated connection.
	pub fn set_connected(&self, connected: bool) {
		self.connected.store(connected, Ordering::SeqCst);
	}

	/// Retained messages of a topic, for inspection.
	pub fn messages(&self, topic: &str) -> Vec<StoredMessage> {
		self.topics
			.get(topic)
			.and_then(|topic| topic.messages.read().ok().map(|messages| messages.clone()))
			.unwrap_or_default()
	}

	pub fn message_count(&self, topic: &str) -> usize {
		self.messages(topic).len()
	}
}

#[async_trait]
impl BrokerAdapter for BrokerAdapterMemory {
	async fn create_producer(
		&self,
		topic: &str,
		producer_name: &str,
	) -> RelayResult<Box<dyn BrokerProducer>> {
		self.ensure_connected()?;
		debug!("producer {} on {}", producer_name, topic);
		Ok(Box::new(MemoryProducer {
			topic: self.topic(topic),
			name: producer_name.to_owned(),
			connected: self.connected.clone(),
			closed: AtomicBool::new(false),
		}))
	}

	async fn subscribe(
		&self,
		topic: &str,
		subscription: &str,
	) -> RelayResult<Box<dyn BrokerConsumer>> {
		self.ensure_connected()?;
		debug!("subscription {} on {}", subscription, topic);
		let topic = self.topic(topic);
		let cursor = *topic.len_tx.borrow();
		let len_rx = topic.len_tx.subscribe();
		Ok(Box::new(MemoryConsumer {
			topic,
			subscription: subscription.to_owned(),
			cursor,
			len_rx,
			connected: self.connected.clone(),
			closed: false,
		}))
	}

	async fn create_reader(
		&self,
		topic: &str,
		opts: ReaderOptions,
	) -> RelayResult<Box<dyn BrokerReader>> {
		self.ensure_connected()?;
		let topic = self.topic(topic);
		let start = match &opts.start {
			ReaderStart::Earliest => 0,
			ReaderStart::Checkpoint(id) => decode_message_id(id)? + 1,
		};

		let messages = topic
			.messages
			.read()
			.map_err(|_| Error::Internal("topic ledger lock poisoned".into()))?;
		let backlog: VecDeque<StoredMessage> = if opts.compacted {
			// Latest message per key over the whole ledger; unkeyed
			// messages always survive.
			let mut latest: HashMap<&str, u64> = HashMap::new();
			for msg in messages.iter() {
				if let Some(key) = &msg.partition_key {
					latest.insert(key.as_str(), msg.offset);
				}
			}
			messages
				.iter()
				.filter(|msg| msg.offset >= start)
				.filter(|msg| match &msg.partition_key {
					Some(key) => latest.get(key.as_str()) == Some(&msg.offset),
					None => true,
				})
				.cloned()
				.collect()
		} else {
			messages.iter().filter(|msg| msg.offset >= start).cloned().collect()
		};
		let tail = messages.len() as u64;
		drop(messages);

		let len_rx = topic.len_tx.subscribe();
		Ok(Box::new(MemoryReader { topic, backlog, pos: tail.max(start), len_rx, closed: false }))
	}

	fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}

	async fn reconnect(&self) -> RelayResult<()> {
		self.connected.store(true, Ordering::SeqCst);
		debug!("broker client rebuilt");
		Ok(())
	}

	async fn close(&self) -> RelayResult<()> {
		self.connected.store(false, Ordering::SeqCst);
		Ok(())
	}
}

#[derive(Debug)]
struct MemoryProducer {
	topic: Arc<Topic>,
	name: String,
	connected: Arc<AtomicBool>,
	closed: AtomicBool,
}

#[async_trait]
impl BrokerProducer for MemoryProducer {
	async fn send(&self, msg: BrokerMessage) -> RelayResult<()> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(Error::BrokerError(format!("producer {} is closed", self.name)));
		}
		if !self.connected.load(Ordering::SeqCst) {
			return Err(Error::BrokerDisconnected);
		}
		self.topic.append(msg)?;
		Ok(())
	}

	fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
	}

	async fn close(&self) -> RelayResult<()> {
		self.closed.store(true, Ordering::SeqCst);
		Ok(())
	}
}

#[derive(Debug)]
struct MemoryConsumer {
	topic: Arc<Topic>,
	#[allow(dead_code)]
	subscription: String,
	cursor: u64,
	len_rx: watch::Receiver<u64>,
	connected: Arc<AtomicBool>,
	closed: bool,
}

#[async_trait]
impl BrokerConsumer for MemoryConsumer {
	async fn receive(&mut self) -> RelayResult<ReceivedMessage> {
		loop {
			if self.closed {
				return Err(Error::ConsumerClosed);
			}
			if !self.connected.load(Ordering::SeqCst) {
				return Err(Error::BrokerDisconnected);
			}
			if let Some(stored) = self.topic.read_at(self.cursor)? {
				self.cursor += 1;
				return Ok(stored.received());
			}
			if self.len_rx.changed().await.is_err() {
				return Err(Error::ConsumerClosed);
			}
		}
	}

	async fn ack(&mut self, id: &MessageId) -> RelayResult<()> {
		// Validate the id; per-message ack state is not retained.
		decode_message_id(id)?;
		Ok(())
	}

	fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst) && !self.closed
	}

	async fn close(&mut self) -> RelayResult<()> {
		self.closed = true;
		Ok(())
	}
}

#[derive(Debug)]
struct MemoryReader {
	topic: Arc<Topic>,
	/// Retained history selected at open (compacted when requested).
	backlog: VecDeque<StoredMessage>,
	/// Next ledger offset for messages appended after open.
	pos: u64,
	len_rx: watch::Receiver<u64>,
	closed: bool,
}

#[async_trait]
impl BrokerReader for MemoryReader {
	async fn read_next(&mut self, timeout: Duration) -> RelayResult<Option<ReceivedMessage>> {
		if self.closed {
			return Err(Error::BrokerError("reader is closed".into()));
		}
		if let Some(stored) = self.backlog.pop_front() {
			return Ok(Some(stored.received()));
		}
		let deadline = tokio::time::Instant::now() + timeout;
		loop {
			if let Some(stored) = self.topic.read_at(self.pos)? {
				self.pos += 1;
				return Ok(Some(stored.received()));
			}
			match tokio::time::timeout_at(deadline, self.len_rx.changed()).await {
				Ok(Ok(())) => {}
				// Timeout, or the topic is gone: nothing more to read now.
				Ok(Err(_)) | Err(_) => return Ok(None),
			}
		}
	}

	async fn close(&mut self) -> RelayResult<()> {
		self.closed = true;
		Ok(())
	}
}

// vim: ts=4
