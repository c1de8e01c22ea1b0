//! Authentication Strategy
//!
//! Pluggable predicate over the WebSocket upgrade request. The relay calls
//! it once per connection, before the document actor is acquired. The
//! default strategy allows everything; deployments compose their own at
//! startup.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;

use crate::prelude::*;

/// The parts of an upgrade request an auth strategy may inspect.
#[derive(Clone, Debug)]
pub struct UpgradeRequest {
	/// Requested document name.
	pub doc_name: Box<str>,

	/// Bearer token, when the client supplied one (header or query).
	pub token: Option<Box<str>>,

	/// Remaining query parameters of the upgrade URL.
	pub params: HashMap<String, String>,
}

#[async_trait]
pub trait AuthStrategy: Debug + Send + Sync {
	/// Returns `Ok(())` to accept the connection, `Err(Error::Unauthorized)`
	/// (or any other error) to refuse it.
	async fn authorize(&self, req: &UpgradeRequest) -> RelayResult<()>;
}

/// Default strategy: accept every connection.
#[derive(Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl AuthStrategy for AllowAll {
	async fn authorize(&self, _req: &UpgradeRequest) -> RelayResult<()> {
		Ok(())
	}
}

/// Strategy requiring a static shared token.
#[derive(Debug)]
pub struct StaticToken {
	token: Box<str>,
}

impl StaticToken {
	pub fn new(token: impl Into<Box<str>>) -> Self {
		Self { token: token.into() }
	}
}

#[async_trait]
impl AuthStrategy for StaticToken {
	async fn authorize(&self, req: &UpgradeRequest) -> RelayResult<()> {
		match &req.token {
			Some(token) if token.as_ref() == self.token.as_ref() => Ok(()),
			_ => Err(Error::Unauthorized),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn request(token: Option<&str>) -> UpgradeRequest {
		UpgradeRequest {
			doc_name: "doc".into(),
			token: token.map(Into::into),
			params: HashMap::new(),
		}
	}

	#[tokio::test]
	async fn test_allow_all() {
		assert!(AllowAll.authorize(&request(None)).await.is_ok());
	}

	#[tokio::test]
	async fn test_static_token() {
		let auth = StaticToken::new("s3cret");
		assert!(auth.authorize(&request(Some("s3cret"))).await.is_ok());
		assert!(auth.authorize(&request(Some("wrong"))).await.is_err());
		assert!(auth.authorize(&request(None)).await.is_err());
	}
}

// vim: ts=4
