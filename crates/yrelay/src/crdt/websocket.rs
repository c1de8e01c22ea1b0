//! WebSocket endpoint.
//!
//! One path per instance: `/ws/{doc}` (or `/ws?doc=...`). After the auth
//! strategy accepts the upgrade, the socket is bound to the document's
//! actor and handed to the peer session. Actor acquisition happens on the
//! upgraded socket so slow restores never stall the HTTP handshake; when it
//! fails, the socket is closed with an internal-error status.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;

use crate::crdt::session;
use crate::prelude::*;

use yrelay_types::auth_adapter::UpgradeRequest;

pub fn router(app: App) -> Router {
	Router::new()
		.route("/ws/{doc}", get(ws_path_handler))
		.route("/ws", get(ws_query_handler))
		.with_state(app)
}

async fn ws_path_handler(
	State(app): State<App>,
	Path(doc_name): Path<String>,
	Query(params): Query<HashMap<String, String>>,
	headers: HeaderMap,
	ws: WebSocketUpgrade,
) -> Response {
	serve(app, doc_name, params, headers, ws).await
}

async fn ws_query_handler(
	State(app): State<App>,
	Query(params): Query<HashMap<String, String>>,
	headers: HeaderMap,
	ws: WebSocketUpgrade,
) -> Response {
	let Some(doc_name) = params.get("doc").cloned() else {
		return (StatusCode::BAD_REQUEST, "missing doc parameter").into_response();
	};
	serve(app, doc_name, params, headers, ws).await
}

async fn serve(
	app: App,
	doc_name: String,
	params: HashMap<String, String>,
	headers: HeaderMap,
	ws: WebSocketUpgrade,
) -> Response {
	if doc_name.is_empty() || doc_name.contains('/') || doc_name.contains("..") {
		return (StatusCode::BAD_REQUEST, "invalid document name").into_response();
	}

	let request = UpgradeRequest {
		doc_name: doc_name.clone().into(),
		token: bearer_token(&headers, &params),
		params,
	};
	if let Err(e) = app.auth.authorize(&request).await {
		debug!("upgrade for {} refused: {}", doc_name, e);
		return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
	}

	ws.on_upgrade(move |socket| handle_socket(app, doc_name, socket))
}

async fn handle_socket(app: App, doc_name: String, mut socket: WebSocket) {
	match app.docs.get(&app, &doc_name).await {
		Ok(handle) => session::run(socket, handle).await,
		Err(e) => {
			warn!("document {} unavailable: {}", doc_name, e);
			let frame = CloseFrame { code: close_code::ERROR, reason: "internal error".into() };
			let _ = socket.send(Message::Close(Some(frame))).await;
		}
	}
}

fn bearer_token(headers: &HeaderMap, params: &HashMap<String, String>) -> Option<Box<str>> {
	if let Some(value) = headers.get(header::AUTHORIZATION) {
		if let Ok(value) = value.to_str() {
			if let Some(token) = value.strip_prefix("Bearer ") {
				return Some(token.into());
			}
		}
	}
	params.get("token").map(|token| token.as_str().into())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_bearer_token_header() {
		let mut headers = HeaderMap::new();
		headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
		let token = bearer_token(&headers, &HashMap::new());
		assert_eq!(token.as_deref(), Some("abc"));
	}

	#[test]
	fn test_bearer_token_query_fallback() {
		let mut params = HashMap::new();
		params.insert("token".to_string(), "xyz".to_string());
		let token = bearer_token(&HeaderMap::new(), &params);
		assert_eq!(token.as_deref(), Some("xyz"));
	}

	#[test]
	fn test_bearer_token_absent() {
		assert!(bearer_token(&HeaderMap::new(), &HashMap::new()).is_none());
	}
}

// vim: ts=4
