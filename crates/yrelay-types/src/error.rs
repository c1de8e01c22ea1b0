//! Error handling subsystem. Implements the relay-wide Error type.

use crate::prelude::*;

pub type RelayResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	// Core errors
	NotFound,
	Unauthorized,
	Parse,

	// Input validation
	ValidationError(String), // invalid input data (bad frame, bad document name)

	// Broker path
	BrokerDisconnected,        // the broker client or a handle on it is gone
	BrokerError(String),       // other broker failures (create, send, receive)
	ConsumerClosed,            // consumer handle was closed, the ingress loop must exit

	// Storage path
	StoreError(String),   // object store failures that are not absent-equivalent
	SnapshotMalformed,    // snapshot record failed to decode; distinct from absent

	// Network
	NetworkError(String),
	Timeout,

	// System and configuration
	ConfigError(String),
	Internal(String), // internal invariant violations, for debugging

	// externals
	Io(std::io::Error),
}

impl Error {
	/// True for errors that indicate the broker connection itself is gone,
	/// as opposed to a transient per-operation failure.
	pub fn is_disconnect(&self) -> bool {
		matches!(self, Error::BrokerDisconnected | Error::ConsumerClosed)
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		warn!("io error: {}", err);
		Self::Io(err)
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{:?}", self)
	}
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
	fn from(_err: serde_json::Error) -> Self {
		warn!("json error: {}", _err);
		Error::Parse
	}
}

impl From<base64::DecodeError> for Error {
	fn from(_err: base64::DecodeError) -> Self {
		warn!("base64 error: {}", _err);
		Error::Parse
	}
}

// vim: ts=4
