//! Frame codec.
//!
//! Two encodings share the same kind space:
//!
//! - On the socket, frames are Yjs sync-protocol messages
//!   (`yrs::sync::Message` v1): variable-length kind, then a
//!   length-prefixed body.
//! - On the broker, a message payload is one raw kind byte followed by the
//!   raw body; the `SYNC` body is a plain CRDT update, the `AWARENESS` body
//!   a plain awareness diff.
//!
//! ```text
//! kind 0 = SYNC (Yjs sync protocol)
//! kind 1 = AWARENESS (user presence)
//! ```

use yrs::sync::{Message, SyncMessage};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;

use crate::prelude::*;

use yrelay_types::broker_adapter::{MESSAGE_TYPE_AWARENESS, MESSAGE_TYPE_SYNC};

/// Kind of a broker payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameKind {
	Sync = 0,
	Awareness = 1,
}

impl FrameKind {
	pub fn from_u8(b: u8) -> Option<Self> {
		match b {
			0 => Some(FrameKind::Sync),
			1 => Some(FrameKind::Awareness),
			_ => None,
		}
	}

	pub fn as_u8(self) -> u8 {
		self as u8
	}

	/// `messageType` property value for broker messages.
	pub fn message_type(self) -> &'static str {
		match self {
			FrameKind::Sync => MESSAGE_TYPE_SYNC,
			FrameKind::Awareness => MESSAGE_TYPE_AWARENESS,
		}
	}
}

/// Build a broker payload: kind byte + raw body.
pub fn encode_broker_payload(kind: FrameKind, body: &[u8]) -> Vec<u8> {
	let mut payload = Vec::with_capacity(1 + body.len());
	payload.push(kind.as_u8());
	payload.extend_from_slice(body);
	payload
}

/// Split a broker payload into kind and body.
///
/// Rejects empty payloads, empty bodies and unknown kind bytes; the caller
/// logs, acknowledges and moves on.
pub fn decode_broker_payload(payload: &[u8]) -> RelayResult<(FrameKind, &[u8])> {
	let Some((&kind, body)) = payload.split_first() else {
		return Err(Error::ValidationError("empty broker payload".into()));
	};
	let kind = FrameKind::from_u8(kind)
		.ok_or_else(|| Error::ValidationError(format!("unknown frame kind {}", kind)))?;
	if body.is_empty() {
		return Err(Error::ValidationError("empty frame body".into()));
	}
	Ok((kind, body))
}

/// Decode a binary socket frame into a sync-protocol message.
pub fn decode_socket_frame(data: &[u8]) -> RelayResult<Message> {
	if data.is_empty() {
		return Err(Error::ValidationError("empty frame".into()));
	}
	Message::decode_v1(data)
		.map_err(|e| Error::ValidationError(format!("undecodable frame: {}", e)))
}

pub fn encode_socket_frame(msg: &Message) -> Vec<u8> {
	msg.encode_v1()
}

/// Socket frame carrying a raw CRDT update.
pub fn sync_update_frame(update: &[u8]) -> Vec<u8> {
	Message::Sync(SyncMessage::Update(update.to_vec())).encode_v1()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_kind_round_trip() {
		assert_eq!(FrameKind::from_u8(0), Some(FrameKind::Sync));
		assert_eq!(FrameKind::from_u8(1), Some(FrameKind::Awareness));
		assert_eq!(FrameKind::from_u8(2), None);
		assert_eq!(FrameKind::Sync.as_u8(), 0);
		assert_eq!(FrameKind::Awareness.as_u8(), 1);
	}

	#[test]
	fn test_broker_payload_round_trip() {
		let payload = encode_broker_payload(FrameKind::Sync, &[1, 2, 3]);
		assert_eq!(payload, vec![0, 1, 2, 3]);
		let (kind, body) = decode_broker_payload(&payload).unwrap();
		assert_eq!(kind, FrameKind::Sync);
		assert_eq!(body, &[1, 2, 3]);
	}

	#[test]
	fn test_broker_payload_boundaries() {
		// empty payload
		assert!(decode_broker_payload(&[]).is_err());
		// kind byte only
		assert!(decode_broker_payload(&[0]).is_err());
		assert!(decode_broker_payload(&[1]).is_err());
		// unknown kind
		assert!(decode_broker_payload(&[0xFF, 1]).is_err());
	}

	#[test]
	fn test_socket_frame_boundaries() {
		assert!(decode_socket_frame(&[]).is_err());
		// kind without body
		assert!(decode_socket_frame(&[0]).is_err());
		// unknown/garbage kind
		assert!(decode_socket_frame(&[0xFF]).is_err());
		// truncated sync body
		assert!(decode_socket_frame(&[0, 7]).is_err());
	}

	#[test]
	fn test_socket_frame_round_trip() {
		let frame = sync_update_frame(&[0, 0]);
		match decode_socket_frame(&frame).unwrap() {
			Message::Sync(SyncMessage::Update(update)) => assert_eq!(update, vec![0, 0]),
			other => panic!("unexpected message: {:?}", other),
		}
	}
}

// vim: ts=4
