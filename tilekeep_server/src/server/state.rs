//! Shared application state handed to every Axum handler.

use axum::http::HeaderMap;
use std::sync::Arc;
use tilekeep_services::{GlyphsService, ImportCoordinator, SpritesService, StylesService, TilesService, TilesetsService, UpstreamManager};

#[derive(Clone)]
pub struct AppState {
	pub tilesets: Arc<TilesetsService>,
	pub tiles: Arc<TilesService>,
	pub styles: Arc<StylesService>,
	pub sprites: Arc<SpritesService>,
	pub glyphs: Arc<GlyphsService>,
	pub imports: Arc<ImportCoordinator>,
	pub upstream: Arc<UpstreamManager>,
	pub default_access_token: Option<String>,
}

/// Derives the externally-visible base URL for a request from the `Host`
/// header (falling back to `localhost`) and `X-Forwarded-Proto` (falling
/// back to `http`). Used to rewrite TileJSON/style documents so links point
/// back at this server rather than at upstream sources.
pub fn base_url(headers: &HeaderMap) -> String {
	let host = headers.get(axum::http::header::HOST).and_then(|v| v.to_str().ok()).unwrap_or("localhost");
	let scheme = headers.get("x-forwarded-proto").and_then(|v| v.to_str().ok()).unwrap_or("http");
	format!("{scheme}://{host}")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_to_http_localhost() {
		let headers = HeaderMap::new();
		assert_eq!(base_url(&headers), "http://localhost");
	}

	#[test]
	fn honours_host_and_forwarded_proto() {
		let mut headers = HeaderMap::new();
		headers.insert(axum::http::header::HOST, "tiles.example.org".parse().unwrap());
		headers.insert("x-forwarded-proto", "https".parse().unwrap());
		assert_eq!(base_url(&headers), "https://tiles.example.org");
	}
}
