//! Snapshot codec.
//!
//! A snapshot is one self-describing JSON record per document:
//!
//! ```json
//! {
//!   "state": "<base64 CRDT state update>",
//!   "checkpoint": "<base64 broker message id>",
//!   "messageCount": 42,
//!   "timestamp": 1700000000
//! }
//! ```
//!
//! `checkpoint` is the id of the last broker message folded into `state`,
//! in the broker's canonical binary form. Decoding distinguishes malformed
//! from absent: on a malformed record the actor clears the object and
//! restores from the earliest topic position instead.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::prelude::*;

use yrelay_types::broker_adapter::MessageId;

/// Decoded snapshot.
#[derive(Clone, Debug)]
pub struct Snapshot {
	/// CRDT state encoded as one update.
	pub state: Vec<u8>,

	/// Broker message id of the last folded message.
	pub checkpoint: MessageId,

	/// Running count of folded broker messages. Monotonically
	/// non-decreasing across successive snapshots of one document.
	pub message_count: u64,

	/// Wall-clock creation time, seconds.
	pub timestamp: Timestamp,
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SnapshotRecord {
	state: String,
	checkpoint: String,
	message_count: u64,
	timestamp: i64,
}

pub fn encode(snapshot: &Snapshot) -> RelayResult<Vec<u8>> {
	let record = SnapshotRecord {
		state: BASE64.encode(&snapshot.state),
		checkpoint: BASE64.encode(snapshot.checkpoint.as_bytes()),
		message_count: snapshot.message_count,
		timestamp: snapshot.timestamp.0,
	};
	Ok(serde_json::to_vec(&record)?)
}

/// Decode a stored snapshot. Every failure mode maps to
/// [`Error::SnapshotMalformed`] so the caller can clear the object.
pub fn decode(data: &[u8]) -> RelayResult<Snapshot> {
	let record: SnapshotRecord =
		serde_json::from_slice(data).map_err(|_| Error::SnapshotMalformed)?;
	let state = BASE64.decode(&record.state).map_err(|_| Error::SnapshotMalformed)?;
	let checkpoint = BASE64.decode(&record.checkpoint).map_err(|_| Error::SnapshotMalformed)?;
	if checkpoint.is_empty() {
		return Err(Error::SnapshotMalformed);
	}
	Ok(Snapshot {
		state,
		checkpoint: MessageId::from_bytes(checkpoint),
		message_count: record.message_count,
		timestamp: Timestamp(record.timestamp),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample() -> Snapshot {
		Snapshot {
			state: vec![1, 2, 3, 4],
			checkpoint: MessageId::from_bytes(vec![0, 0, 0, 0, 0, 0, 0, 9]),
			message_count: 35,
			timestamp: Timestamp(1700000000),
		}
	}

	#[test]
	fn test_round_trip_identity() {
		let snapshot = sample();
		let encoded = encode(&snapshot).unwrap();
		let decoded = decode(&encoded).unwrap();
		assert_eq!(decoded.state, snapshot.state);
		assert_eq!(decoded.checkpoint, snapshot.checkpoint);
		assert_eq!(decoded.message_count, snapshot.message_count);
		assert_eq!(decoded.timestamp, snapshot.timestamp);
	}

	#[test]
	fn test_not_json_is_malformed() {
		assert!(matches!(decode(b"not json"), Err(Error::SnapshotMalformed)));
	}

	#[test]
	fn test_missing_field_is_malformed() {
		let raw = br#"{"state":"AA==","messageCount":1,"timestamp":0}"#;
		assert!(matches!(decode(raw), Err(Error::SnapshotMalformed)));
	}

	#[test]
	fn test_bad_base64_is_malformed() {
		let raw = br#"{"state":"!!","checkpoint":"AA==","messageCount":1,"timestamp":0}"#;
		assert!(matches!(decode(raw), Err(Error::SnapshotMalformed)));
	}

	#[test]
	fn test_empty_checkpoint_is_malformed() {
		let raw = br#"{"state":"AA==","checkpoint":"","messageCount":1,"timestamp":0}"#;
		assert!(matches!(decode(raw), Err(Error::SnapshotMalformed)));
	}
}

// vim: ts=4
