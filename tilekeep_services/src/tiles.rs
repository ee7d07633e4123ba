//! The tile read/write path.

use crate::tilesets::TilesetsService;
use crate::upstream::{ResponseType, UpstreamManager};
use std::sync::Arc;
use tilekeep_core::error::{AppError, AppResult};
use tilekeep_core::tile_address::{self, Scheme, SniffedHeaders, TileCoord};
use tilekeep_store::Store;

pub struct TilesService {
	store: Arc<Store>,
	upstream: Arc<UpstreamManager>,
	tilesets: Arc<TilesetsService>,
}

pub struct TileResponse {
	pub data: Vec<u8>,
	pub headers: SniffedHeaders,
	pub etag: Option<String>,
}

impl TilesService {
	pub fn new(store: Arc<Store>, upstream: Arc<UpstreamManager>, tilesets: Arc<TilesetsService>) -> Arc<TilesService> {
		Arc::new(TilesService { store, upstream, tilesets })
	}

	pub async fn get(self: &Arc<Self>, tileset_id: &str, z: u8, x: u32, y: u32, access_token: Option<&str>) -> AppResult<TileResponse> {
		let quad_key = tile_address::tile_to_quad_key(x, y, z);

		if let Some((data, etag)) = self.store.get_tile(tileset_id, &quad_key).map_err(AppError::Internal)? {
			self.spawn_revalidation(tileset_id, z, x, y, etag.clone(), access_token.map(str::to_owned));
			let headers = tile_address::sniff_tile_headers(&data);
			return Ok(TileResponse { data, headers, etag });
		}

		let (_, upstream_tile_urls) = self.tilesets.get_info(tileset_id)?;
		let templates = upstream_tile_urls.filter(|t| !t.is_empty()).ok_or(AppError::NotFound)?;

		let coord = TileCoord::new(z, x, y);
		let url = tile_address::interpolate(&templates, Scheme::Xyz, coord, 1, access_token).map_err(AppError::Internal)?;

		let response = self.upstream.get_upstream(&url, ResponseType::Buffer, None).await.map_err(|_| AppError::NotFound)?;
		let data = response.body.into_bytes().to_vec();

		self.put(tileset_id, z, x, y, &data, response.etag.clone()).map_err(AppError::Internal)?;
		let headers = tile_address::sniff_tile_headers(&data);
		Ok(TileResponse { data, headers, etag: response.etag })
	}

	fn spawn_revalidation(self: &Arc<Self>, tileset_id: &str, z: u8, x: u32, y: u32, etag: Option<String>, access_token: Option<String>) {
		let this = Arc::clone(self);
		let tileset_id = tileset_id.to_string();
		tokio::spawn(async move {
			let (_, upstream_tile_urls) = match this.tilesets.get_info(&tileset_id) {
				Ok(info) => info,
				Err(_) => return,
			};
			let Some(templates) = upstream_tile_urls.filter(|t| !t.is_empty()) else { return };

			let coord = TileCoord::new(z, x, y);
			let Ok(url) = tile_address::interpolate(&templates, Scheme::Xyz, coord, 1, access_token.as_deref()) else { return };

			match this.upstream.get_upstream(&url, ResponseType::Buffer, etag.as_deref()).await {
				Ok(response) => {
					let data = response.body.into_bytes().to_vec();
					if let Err(err) = this.put(&tileset_id, z, x, y, &data, response.etag) {
						log::warn!("failed to persist revalidated tile: {err}");
					}
				}
				Err(err) => log::debug!("background tile revalidation skipped: {err}"),
			}
		});
	}

	pub fn put(&self, tileset_id: &str, z: u8, x: u32, y: u32, data: &[u8], etag: Option<String>) -> anyhow::Result<()> {
		let quad_key = tile_address::tile_to_quad_key(x, y, z);
		self.store.upsert_tile(tileset_id, &quad_key, data, etag.as_deref())?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use std::time::Duration;

	fn services() -> (Arc<TilesetsService>, Arc<TilesService>) {
		let store = Arc::new(Store::open_in_memory().unwrap());
		let upstream = UpstreamManager::new("tilekeep-test/0.1", Duration::from_secs(5)).unwrap();
		let tilesets = TilesetsService::new(Arc::clone(&store), Arc::clone(&upstream));
		let tiles = TilesService::new(store, upstream, Arc::clone(&tilesets));
		(tilesets, tiles)
	}

	#[tokio::test]
	async fn miss_without_upstream_is_not_found() {
		let (tilesets, tiles) = services();
		let tilejson = json!({"tilejson": "2.2.0", "tiles": [], "format": "png"});
		let created = tilesets.create(tilejson, "http://localhost", None, None).unwrap();
		let id = created["id"].as_str().unwrap().to_string();

		let err = tiles.get(&id, 1, 0, 0, None).await.unwrap_err();
		assert!(matches!(err, AppError::NotFound));
	}

	#[tokio::test]
	async fn hit_returns_stored_bytes_with_sniffed_headers() {
		let (tilesets, tiles) = services();
		let tilejson = json!({"tilejson": "2.2.0", "tiles": ["http://a/{z}/{x}/{y}"], "format": "png"});
		let created = tilesets.create(tilejson, "http://localhost", None, None).unwrap();
		let id = created["id"].as_str().unwrap().to_string();

		let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
		tiles.put(&id, 1, 0, 0, &png, Some("\"abc\"".to_string())).unwrap();

		let response = tiles.get(&id, 1, 0, 0, None).await.unwrap();
		assert_eq!(response.data, png);
		assert_eq!(response.headers.content_type, "image/png");
		assert_eq!(response.etag.as_deref(), Some("\"abc\""));
	}
}
