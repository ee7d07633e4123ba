//! HTTP server lifecycle: binds a socket, applies cross-cutting middleware,
//! and supports graceful shutdown.

use super::cors;
use super::routes::build_router;
use super::state::AppState;
use crate::config::{Config, CorsConfig};
use anyhow::Result;
use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::BoxError;
use std::sync::Arc;
use std::time::Duration;
use tilekeep_services::{GlyphsService, ImportCoordinator, SpritesService, StylesService, TilesService, TilesetsService, UpstreamManager};
use tilekeep_store::Store;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower::limit::ConcurrencyLimitLayer;
use tower::load_shed::LoadShedLayer;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;

const GLOBAL_CONCURRENCY: usize = 256;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Thin orchestration layer. Owns only lifecycle state; request handling
/// lives in `handlers`/`routes`.
pub struct TileServer {
	ip: String,
	port: u16,
	cors: CorsConfig,
	state: AppState,
	exit_signal: Option<oneshot::Sender<()>>,
	join: Option<tokio::task::JoinHandle<()>>,
}

impl TileServer {
	pub fn new(config: &Config, store: Arc<Store>) -> Result<TileServer> {
		let upstream = UpstreamManager::new(&config.upstream.user_agent, Duration::from_secs(config.upstream.timeout_secs))?;
		let tilesets = TilesetsService::new(Arc::clone(&store), Arc::clone(&upstream));
		let tiles = TilesService::new(Arc::clone(&store), Arc::clone(&upstream), Arc::clone(&tilesets));
		let styles = StylesService::new(Arc::clone(&store), Arc::clone(&upstream), Arc::clone(&tilesets));
		let sprites = SpritesService::new(Arc::clone(&store), Arc::clone(&upstream));
		let glyphs = GlyphsService::new(Arc::clone(&store), Arc::clone(&upstream), config.static_glyphs_dir.clone());
		let imports = ImportCoordinator::new(Arc::clone(&store), Arc::clone(&tilesets), Arc::clone(&styles));

		let state = AppState {
			tilesets,
			tiles,
			styles,
			sprites,
			glyphs,
			imports,
			upstream,
			default_access_token: config.default_access_token.clone(),
		};

		Ok(TileServer {
			ip: config.server.ip_or_default().to_string(),
			port: config.server.port_or_default(),
			cors: config.cors.clone(),
			state,
			exit_signal: None,
			join: None,
		})
	}

	#[cfg(test)]
	pub fn new_test(ip: &str, port: u16, store: Arc<Store>) -> TileServer {
		let config = Config { server: crate::config::ServerConfig { ip: Some(ip.to_string()), port: Some(port) }, ..Config::default() };
		TileServer::new(&config, store).expect("test server should build")
	}

	/// Start listening and serving requests. Idempotent: if already running,
	/// the previous instance is stopped first.
	pub async fn start(&mut self) -> Result<()> {
		if self.exit_signal.is_some() || self.join.is_some() {
			self.stop().await;
		}

		log::info!("starting server");

		let mut router = build_router(self.state.clone());
		let cors_layer = cors::build_cors_layer(&self.cors)?;
		router = router.layer(ServiceBuilder::new().layer(cors_layer));

		// Order, innermost to outermost: ConcurrencyLimit -> LoadShed -> Timeout -> CatchPanic -> HandleError.
		// LoadShed must wrap ConcurrencyLimit, not the reverse: it's the layer
		// that turns "no free slot" into an immediate 503 instead of a queued,
		// eventually-timed-out request.
		let overload_handler = HandleErrorLayer::new(|_err: BoxError| async move {
			let mut resp = (StatusCode::SERVICE_UNAVAILABLE, "Service overloaded, try later").into_response();
			resp.headers_mut().insert("Retry-After", "2".parse().unwrap());
			Ok::<_, std::convert::Infallible>(resp)
		});

		let protection = ServiceBuilder::new()
			.layer(overload_handler)
			.layer(CatchPanicLayer::new())
			.layer(TimeoutLayer::new(REQUEST_TIMEOUT))
			.layer(LoadShedLayer::new())
			.layer(ConcurrencyLimitLayer::new(GLOBAL_CONCURRENCY));

		router = router.layer(protection);

		let addr = format!("{}:{}", self.ip, self.port);
		log::info!("server binding on {addr}");

		let listener = TcpListener::bind(&addr).await?;
		if self.port == 0 {
			self.port = listener.local_addr()?.port();
		}

		let (tx, rx) = oneshot::channel::<()>();
		let handle = tokio::spawn(async move {
			if let Err(err) = axum::serve(listener, router.into_make_service())
				.with_graceful_shutdown(async {
					rx.await.ok();
				})
				.await
			{
				log::error!("server task exited with error: {err}");
			}
		});

		self.exit_signal = Some(tx);
		self.join = Some(handle);

		Ok(())
	}

	/// Trigger graceful shutdown and wait for the server task to finish.
	/// Idempotent: if the server is not running, this returns immediately.
	pub async fn stop(&mut self) {
		if self.exit_signal.is_none() && self.join.is_none() {
			return;
		}

		log::info!("stopping server");

		if let Some(tx) = self.exit_signal.take() {
			let _ = tx.send(());
		}

		if let Some(handle) = self.join.take() {
			match tokio::time::timeout(Duration::from_secs(10), handle).await {
				Ok(join_result) => {
					if let Err(join_err) = join_result {
						log::warn!("server task join error: {join_err}");
					}
				}
				Err(_) => log::warn!("server task did not shutdown within timeout; continuing"),
			}
		}
	}

	pub fn get_port(&self) -> u16 {
		self.port
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::{Value, json};

	const IP: &str = "127.0.0.1";

	#[tokio::test]
	async fn status_endpoint_responds_ready() -> Result<()> {
		let store = Arc::new(Store::open_in_memory()?);
		let mut server = TileServer::new_test(IP, 0, store);
		server.start().await?;
		let port = server.get_port();

		let body = reqwest::get(format!("http://{IP}:{port}/status")).await?.text().await?;
		assert_eq!(body, "ready!");

		server.stop().await;
		Ok(())
	}

	#[tokio::test]
	async fn create_and_fetch_tileset_round_trips() -> Result<()> {
		let store = Arc::new(Store::open_in_memory()?);
		let mut server = TileServer::new_test(IP, 0, store);
		server.start().await?;
		let port = server.get_port();

		let client = reqwest::Client::new();
		let tilejson = json!({"tilejson": "2.2.0", "tiles": [], "format": "png"});
		let created: Value = client
			.post(format!("http://{IP}:{port}/tilesets"))
			.json(&tilejson)
			.send()
			.await?
			.json()
			.await?;
		let id = created["id"].as_str().unwrap().to_string();

		let fetched: Value = client.get(format!("http://{IP}:{port}/tilesets/{id}")).send().await?.json().await?;
		assert_eq!(fetched["id"], json!(id));

		server.stop().await;
		Ok(())
	}
}
