//! Relay engine for collaborative document editing.
//!
//! Clients connect over WebSocket to any instance and name a document; all
//! instances cooperate through a per-document topic on a shared message
//! broker so edits made on one instance reach clients connected to any
//! other. A document actor owns the in-memory Yjs state of one document,
//! multiplexes traffic between local peers and the broker topic, and
//! periodically writes compacted snapshots to an object store so a fresh
//! instance can restore without replaying the whole topic.
//!
//! Backends are pluggable: see the `BrokerAdapter`, `SnapshotStore` and
//! `AuthStrategy` traits in `yrelay-types`. Adapters are composed into an
//! [`AppState`] at startup and passed down; there is no global state.

pub mod core;
pub mod crdt;
pub mod prelude;

pub use crate::core::app::{Adapters, App, AppState};
pub use crate::core::settings::{Config, StorageMode};
pub use crate::crdt::websocket::router;

// vim: ts=4
