//! Common types used throughout the relay.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Wall-clock seconds since the Unix epoch, as stored in snapshot records.
#[derive(
	Clone, Copy, Debug, Default, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub fn now() -> Timestamp {
		let res = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
		Timestamp(res.as_secs() as i64)
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_timestamp_ordering() {
		assert!(Timestamp(1) < Timestamp(2));
		assert_eq!(Timestamp(5), Timestamp(5));
		assert!(Timestamp::now() > Timestamp(0));
	}

	#[test]
	fn test_timestamp_serde_is_plain_seconds() {
		let ts = Timestamp(1234567890);
		let json = serde_json::to_string(&ts).unwrap();
		assert_eq!(json, "1234567890");
		let back: Timestamp = serde_json::from_str(&json).unwrap();
		assert_eq!(back, ts);
	}
}

// vim: ts=4
