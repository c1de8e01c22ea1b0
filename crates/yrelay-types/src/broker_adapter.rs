//! Broker Adapter
//!
//! Capability traits for pluggable message-broker backends with
//! Pulsar-family semantics: per-document persistent topics, producers,
//! subscribing consumers, and replay readers that can start from a saved
//! checkpoint and read a per-key compacted view of the topic.
//!
//! The relay engine opens one producer and one consumer per document actor
//! and a short-lived reader during restore. All handles close idempotently;
//! closing an already-closed handle is swallowed by the implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

use crate::prelude::*;

/// Message property carrying the payload kind, for observability and
/// compaction routing. Values: `sync`, `awareness`, `compaction`.
pub const PROP_MESSAGE_TYPE: &str = "messageType";
/// Message property carrying the document name.
pub const PROP_DOC_NAME: &str = "docName";

pub const MESSAGE_TYPE_SYNC: &str = "sync";
pub const MESSAGE_TYPE_AWARENESS: &str = "awareness";
pub const MESSAGE_TYPE_COMPACTION: &str = "compaction";

/// Opaque broker message id in the broker's canonical binary form.
///
/// Snapshots persist these ids as replay checkpoints, so the binary
/// encoding must be stable across broker reconnects and process restarts.
/// Decoding is fallible: a snapshot written against a different backend (or
/// a corrupted record) must surface as a decode error, not a bogus id.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MessageId(Box<[u8]>);

impl MessageId {
	pub fn from_bytes(bytes: impl Into<Box<[u8]>>) -> Self {
		Self(bytes.into())
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}
}

/// An outgoing broker message.
#[derive(Clone, Debug)]
pub struct BrokerMessage {
	/// Raw payload: one kind byte followed by the frame body.
	pub payload: Vec<u8>,

	/// Partition key. Compacted reads keep only the latest message per key.
	pub partition_key: Option<String>,

	/// Observational properties (`messageType`, `docName`).
	pub properties: HashMap<String, String>,
}

impl BrokerMessage {
	pub fn new(payload: Vec<u8>) -> Self {
		Self { payload, partition_key: None, properties: HashMap::new() }
	}

	pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
		self.partition_key = Some(key.into());
		self
	}

	pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.properties.insert(name.into(), value.into());
		self
	}
}

/// A message delivered by a consumer or reader.
#[derive(Clone, Debug)]
pub struct ReceivedMessage {
	pub id: MessageId,
	pub payload: Vec<u8>,
	pub partition_key: Option<String>,
}

/// Where a replay reader starts.
#[derive(Clone, Debug)]
pub enum ReaderStart {
	/// From the earliest retained message of the topic.
	Earliest,
	/// From the message *after* the given checkpoint.
	Checkpoint(MessageId),
}

/// Options for opening a replay reader.
#[derive(Clone, Debug)]
pub struct ReaderOptions {
	pub start: ReaderStart,

	/// Read the compacted view: only the latest message per partition key.
	/// Safe for CRDT sync traffic only when every sync publish uses a
	/// distinct key; the engine guarantees that.
	pub compacted: bool,
}

/// Producer bound to one topic.
///
/// Implementations should bound their in-flight queue and block the caller
/// when it is full; the engine never awaits broker acks on the local
/// delivery path, so this back-pressures only the publish side.
#[async_trait]
pub trait BrokerProducer: Debug + Send + Sync {
	async fn send(&self, msg: BrokerMessage) -> RelayResult<()>;

	fn is_connected(&self) -> bool;

	async fn close(&self) -> RelayResult<()>;
}

/// Subscribing consumer bound to one topic.
#[async_trait]
pub trait BrokerConsumer: Debug + Send + Sync {
	/// Wait for the next message. Returns `Error::ConsumerClosed` once the
	/// consumer (or the client under it) is gone.
	async fn receive(&mut self) -> RelayResult<ReceivedMessage>;

	async fn ack(&mut self, id: &MessageId) -> RelayResult<()>;

	fn is_connected(&self) -> bool;

	async fn close(&mut self) -> RelayResult<()>;
}

/// Replay reader bound to one topic.
#[async_trait]
pub trait BrokerReader: Debug + Send + Sync {
	/// Read the next message, waiting at most `timeout`. `Ok(None)` means
	/// the timeout elapsed with nothing to read; it is not a failure.
	async fn read_next(&mut self, timeout: Duration) -> RelayResult<Option<ReceivedMessage>>;

	async fn close(&mut self) -> RelayResult<()>;
}

/// Broker Adapter trait.
///
/// One instance per process, shared by every document actor. Only the
/// connection supervisor may call `reconnect`; a rebuild invalidates every
/// open producer, consumer and reader.
#[async_trait]
pub trait BrokerAdapter: Debug + Send + Sync {
	/// Create a producer on `topic` with a producer name unique per open.
	async fn create_producer(
		&self,
		topic: &str,
		producer_name: &str,
	) -> RelayResult<Box<dyn BrokerProducer>>;

	/// Create a subscribing consumer on `topic`.
	///
	/// Each call returns an independent consumer that observes the full
	/// message flow of the topic from the moment of subscription; the relay
	/// opens exactly one per document per process, named by the
	/// per-document subscription name.
	async fn subscribe(
		&self,
		topic: &str,
		subscription: &str,
	) -> RelayResult<Box<dyn BrokerConsumer>>;

	/// Open a replay reader over the retained history of `topic`.
	async fn create_reader(
		&self,
		topic: &str,
		opts: ReaderOptions,
	) -> RelayResult<Box<dyn BrokerReader>>;

	fn is_connected(&self) -> bool;

	/// Tear down and rebuild the underlying client. All open handles become
	/// invalid; callers are expected to recreate their actors.
	async fn reconnect(&self) -> RelayResult<()>;

	async fn close(&self) -> RelayResult<()>;
}

// vim: ts=4
