//! Peer session.
//!
//! Pumps one WebSocket between a client and its document actor: a writer
//! task drains the actor's outbound queue, the read loop feeds binary
//! frames into the actor, and a keep-alive task pings every 30 seconds and
//! terminates the socket when the previous ping went unanswered. Malformed
//! frames never close the connection; a closed or failing socket detaches
//! the peer exactly once.

use axum::extract::ws::{Message, WebSocket};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use crate::crdt::doc::DocHandle;
use crate::prelude::*;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Drive one client connection until it terminates.
pub async fn run(ws: WebSocket, handle: DocHandle) {
	let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
	let peer = match handle.attach(outbound_tx).await {
		Ok(peer) => peer,
		Err(e) => {
			warn!("attach to {} failed: {}", handle.name(), e);
			return;
		}
	};
	debug!("session open: peer {} on {}", peer, handle.name());

	let (ws_tx, mut ws_rx) = ws.split();
	let ws_tx = Arc::new(Mutex::new(ws_tx));

	// Writer task - relays actor broadcasts onto the socket.
	let ws_tx_writer = ws_tx.clone();
	let mut writer_task = tokio::spawn(async move {
		while let Some(frame) = outbound_rx.recv().await {
			let mut tx = ws_tx_writer.lock().await;
			if tx.send(Message::Binary(frame.into())).await.is_err() {
				debug!("client disconnected while sending");
				return;
			}
		}
	});

	// Keep-alive task - one unanswered ping terminates the socket.
	let pong_seen = Arc::new(AtomicBool::new(true));
	let pong_seen_ping = pong_seen.clone();
	let ws_tx_ping = ws_tx.clone();
	let mut ping_task = tokio::spawn(async move {
		loop {
			tokio::time::sleep(PING_INTERVAL).await;
			if !pong_seen_ping.swap(false, Ordering::SeqCst) {
				debug!("ping timeout, terminating socket");
				return;
			}
			let mut tx = ws_tx_ping.lock().await;
			if tx.send(Message::Ping(Vec::new().into())).await.is_err() {
				debug!("client disconnected during ping");
				return;
			}
		}
	});

	// Read loop.
	loop {
		tokio::select! {
			msg = ws_rx.next() => match msg {
				Some(Ok(Message::Binary(data))) => {
					if data.is_empty() {
						warn!("empty frame from peer {} on {}", peer, handle.name());
						continue;
					}
					handle.ingest(peer, data.to_vec());
				}
				Some(Ok(Message::Text(_))) => {
					// Binary protocol only; one bad frame must not cost the
					// connection.
					warn!("text frame from peer {} on {} ignored", peer, handle.name());
				}
				Some(Ok(Message::Pong(_))) => {
					pong_seen.store(true, Ordering::SeqCst);
				}
				Some(Ok(Message::Ping(_))) => {} // answered by the transport
				Some(Ok(Message::Close(_))) | None => break,
				Some(Err(e)) => {
					debug!("socket error for peer {} on {}: {}", peer, handle.name(), e);
					break;
				}
			},
			_ = &mut writer_task => break,
			_ = &mut ping_task => break,
		}
	}

	writer_task.abort();
	ping_task.abort();
	handle.detach(peer);
	debug!("session closed: peer {} on {}", peer, handle.name());
}

// vim: ts=4
