//! The per-document fan-in/fan-out engine.
//!
//! One actor task per document owns the Yjs state and relays every frame
//! between its local WebSocket peers and its broker topic. Frames that
//! arrive from the broker are never published back; that origin discipline
//! is carried explicitly on the actor's command channel.

pub mod doc;
pub mod frame;
pub mod registry;
pub mod session;
pub mod snapshot;
pub mod supervisor;
pub mod websocket;

// vim: ts=4
