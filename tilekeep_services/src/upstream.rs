//! The stale-while-revalidate coordinator.
//!
//! A single `reqwest::Client` built once and reused, GET requests with no
//! redirect-following surprises. Concurrent fetches of the same URL are
//! coalesced onto one in-flight request via `dashmap` plus
//! `futures::future::Shared`, the standard combinator for "many callers
//! await one future".

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::{ETAG, IF_NONE_MATCH};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
	Buffer,
	Text,
	Json,
}

#[derive(Debug, Clone)]
pub enum ResponseBody {
	Buffer(bytes::Bytes),
	Text(String),
	Json(serde_json::Value),
}

impl ResponseBody {
	pub fn into_bytes(self) -> bytes::Bytes {
		match self {
			ResponseBody::Buffer(b) => b,
			ResponseBody::Text(t) => t.into_bytes().into(),
			ResponseBody::Json(v) => v.to_string().into_bytes().into(),
		}
	}

	pub fn into_json(self) -> anyhow::Result<serde_json::Value> {
		match self {
			ResponseBody::Json(v) => Ok(v),
			ResponseBody::Text(t) => Ok(serde_json::from_str(&t)?),
			ResponseBody::Buffer(b) => Ok(serde_json::from_slice(&b)?),
		}
	}
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
	pub body: ResponseBody,
	pub etag: Option<String>,
}

/// Error kinds surfaced unchanged to callers.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
	#[error("upstream unreachable: {0}")]
	Offline(String),
	#[error("upstream returned 404 for {0}")]
	NotFoundUpstream(String),
	#[error("upstream returned status {status} for {url}")]
	Http { status: u16, url: String },
	#[error("not modified")]
	NotModified,
}

pub type UpstreamResult = Result<UpstreamResponse, UpstreamError>;
type SharedFetch = Shared<BoxFuture<'static, UpstreamResult>>;

/// Per-URL inflight request coalescing: at most one outstanding HTTP request
/// per URL, with every concurrent caller observing the same result.
pub struct UpstreamManager {
	client: reqwest::Client,
	inflight: DashMap<String, SharedFetch>,
}

impl UpstreamManager {
	pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Arc<UpstreamManager>> {
		let client = reqwest::Client::builder().user_agent(user_agent).timeout(timeout).build()?;
		Ok(Arc::new(UpstreamManager { client, inflight: DashMap::new() }))
	}

	#[cfg(test)]
	fn with_client(client: reqwest::Client) -> Arc<UpstreamManager> {
		Arc::new(UpstreamManager { client, inflight: DashMap::new() })
	}

	/// Requests are keyed by URL alone; `etag` does not participate in the
	/// key, so the first caller's conditional header wins for every other
	/// caller racing it.
	pub async fn get_upstream(self: &Arc<Self>, url: &str, response_type: ResponseType, etag: Option<&str>) -> UpstreamResult {
		// The entry API locks the shard for `url` for the whole match, so the
		// occupied/vacant check and the insert are one atomic step: only the
		// caller that observes `Vacant` ever spawns a fetch.
		let fut = match self.inflight.entry(url.to_string()) {
			Entry::Occupied(existing) => existing.get().clone(),
			Entry::Vacant(slot) => {
				let this = Arc::clone(self);
				let url_owned = url.to_string();
				let etag_owned = etag.map(str::to_owned);
				let cleanup_url = url_owned.clone();

				let handle = tokio::spawn(async move { this.fetch(&url_owned, response_type, etag_owned.as_deref()).await });

				let manager = Arc::clone(self);
				let fut: SharedFetch = async move {
					let result = match handle.await {
						Ok(result) => result,
						Err(join_err) => Err(UpstreamError::Offline(join_err.to_string())),
					};
					manager.inflight.remove(&cleanup_url);
					result
				}
				.boxed()
				.shared();

				slot.insert(fut.clone());
				fut
			}
		};

		fut.await
	}

	/// Resolves once every request currently inflight has settled. New
	/// requests started after this call is made are not waited on.
	pub async fn all_settled(&self) {
		let snapshot: Vec<SharedFetch> = self.inflight.iter().map(|entry| entry.value().clone()).collect();
		for fut in snapshot {
			let _ = fut.await;
		}
	}

	async fn fetch(&self, url: &str, response_type: ResponseType, etag: Option<&str>) -> UpstreamResult {
		let mut request = self.client.get(url);
		if let Some(etag) = etag {
			request = request.header(IF_NONE_MATCH, etag);
		}

		let response = request.send().await.map_err(|err| UpstreamError::Offline(err.to_string()))?;

		if response.status() == reqwest::StatusCode::NOT_MODIFIED {
			return Err(UpstreamError::NotModified);
		}
		if response.status() == reqwest::StatusCode::NOT_FOUND {
			return Err(UpstreamError::NotFoundUpstream(url.to_string()));
		}
		if !response.status().is_success() {
			return Err(UpstreamError::Http { status: response.status().as_u16(), url: url.to_string() });
		}

		let response_etag = response.headers().get(ETAG).and_then(|v| v.to_str().ok()).map(str::to_owned);

		let body = match response_type {
			ResponseType::Buffer => {
				ResponseBody::Buffer(response.bytes().await.map_err(|err| UpstreamError::Offline(err.to_string()))?)
			}
			ResponseType::Text => ResponseBody::Text(response.text().await.map_err(|err| UpstreamError::Offline(err.to_string()))?),
			ResponseType::Json => ResponseBody::Json(
				response.json::<serde_json::Value>().await.map_err(|err| UpstreamError::Offline(err.to_string()))?,
			),
		};

		Ok(UpstreamResponse { body, etag: response_etag })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use wiremock::matchers::{header, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	#[tokio::test]
	async fn coalesces_concurrent_requests_to_the_same_url() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/tile.png"))
			.respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
			.expect(1)
			.mount(&server)
			.await;

		let manager = UpstreamManager::with_client(reqwest::Client::new());
		let url = format!("{}/tile.png", server.uri());

		let mut handles = Vec::new();
		for _ in 0..10 {
			let manager = Arc::clone(&manager);
			let url = url.clone();
			handles.push(tokio::spawn(async move { manager.get_upstream(&url, ResponseType::Buffer, None).await }));
		}

		for handle in handles {
			let result = handle.await.unwrap().unwrap();
			assert_eq!(result.body.into_bytes().as_ref(), b"hello");
		}

		server.verify().await;
	}

	#[tokio::test]
	async fn etag_revalidation_surfaces_not_modified() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/tile.png"))
			.and(header("If-None-Match", "\"abc\""))
			.respond_with(ResponseTemplate::new(304))
			.mount(&server)
			.await;

		let manager = UpstreamManager::with_client(reqwest::Client::new());
		let url = format!("{}/tile.png", server.uri());

		let result = manager.get_upstream(&url, ResponseType::Buffer, Some("\"abc\"")).await;
		assert!(matches!(result, Err(UpstreamError::NotModified)));
	}

	#[tokio::test]
	async fn not_found_is_distinguishable_from_other_statuses() {
		let server = MockServer::start().await;
		Mock::given(method("GET")).and(path("/missing")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

		let manager = UpstreamManager::with_client(reqwest::Client::new());
		let url = format!("{}/missing", server.uri());
		let result = manager.get_upstream(&url, ResponseType::Buffer, None).await;
		assert!(matches!(result, Err(UpstreamError::NotFoundUpstream(_))));
	}

	#[tokio::test]
	async fn all_settled_waits_for_inflight_requests() {
		let server = MockServer::start().await;
		Mock::given(method("GET")).and(path("/slow")).respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(50))).mount(&server).await;

		let manager = UpstreamManager::with_client(reqwest::Client::new());
		let url = format!("{}/slow", server.uri());

		let completed = Arc::new(AtomicUsize::new(0));
		{
			let manager = Arc::clone(&manager);
			let url = url.clone();
			let completed = Arc::clone(&completed);
			tokio::spawn(async move {
				let _ = manager.get_upstream(&url, ResponseType::Buffer, None).await;
				completed.fetch_add(1, Ordering::SeqCst);
			});
		}

		tokio::task::yield_now().await;
		manager.all_settled().await;
		assert_eq!(completed.load(Ordering::SeqCst), 1);
	}
}
