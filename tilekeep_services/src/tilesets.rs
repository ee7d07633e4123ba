//! Tileset CRUD, TileJSON rewriting and the memoised info lookup.

use crate::upstream::{ResponseType, UpstreamManager};
use lru::LruCache;
use serde_json::{Value, json};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tilekeep_core::error::{AppError, AppResult};
use tilekeep_core::{id, json as tj};
use tilekeep_store::Store;
use tilekeep_store::models::Tileset;

type TilesetInfo = (Value, Option<Vec<String>>);

pub struct TilesetsService {
	store: Arc<Store>,
	upstream: Arc<UpstreamManager>,
	info_cache: Mutex<LruCache<String, TilesetInfo>>,
}

fn rewrite_tiles(mut tilejson: Value, base_url: &str, tileset_id: &str) -> Value {
	if let Some(obj) = tilejson.as_object_mut() {
		obj.insert("id".to_string(), json!(tileset_id));
		obj.insert("tiles".to_string(), json!([format!("{base_url}/tilesets/{tileset_id}/{{z}}/{{x}}/{{y}}")]));
	}
	tilejson
}

impl TilesetsService {
	pub fn new(store: Arc<Store>, upstream: Arc<UpstreamManager>) -> Arc<TilesetsService> {
		Arc::new(TilesetsService {
			store,
			upstream,
			info_cache: Mutex::new(LruCache::new(NonZeroUsize::new(10).unwrap())),
		})
	}

	pub fn create(
		&self,
		tilejson: Value,
		base_url: &str,
		etag: Option<String>,
		upstream_url: Option<String>,
	) -> AppResult<Value> {
		let format = tj::validate_tilejson(&tilejson).map_err(|e| AppError::UpstreamJsonValidation(e.to_string()))?;
		let tileset_id = id::tileset_id(&tilejson).map_err(AppError::Internal)?;

		if self.store.get_tileset(&tileset_id).map_err(AppError::Internal)?.is_some() {
			return Err(AppError::AlreadyExists);
		}

		let upstream_tile_urls = tilejson
			.get("tiles")
			.and_then(Value::as_array)
			.filter(|a| !a.is_empty())
			.map(|a| a.iter().filter_map(Value::as_str).map(str::to_owned).collect::<Vec<_>>());

		let row = Tileset {
			id: tileset_id.clone(),
			tilejson: tilejson.clone(),
			format: format.as_str().to_string(),
			upstream_tile_urls,
			upstream_url,
			etag,
		};
		self.store.upsert_tileset(&row).map_err(AppError::Internal)?;
		self.invalidate(&tileset_id);

		Ok(rewrite_tiles(tilejson, base_url, &tileset_id))
	}

	/// Loads the cached record and fires a background revalidation of its
	/// upstream TileJSON; the caller never waits on the revalidation result.
	pub fn get(self: &Arc<Self>, tileset_id: &str, base_url: &str) -> AppResult<Value> {
		let row = self.store.get_tileset(tileset_id).map_err(AppError::Internal)?.ok_or(AppError::NotFound)?;

		if let Some(upstream_url) = row.upstream_url.clone() {
			let this = Arc::clone(self);
			let tileset_id = tileset_id.to_string();
			let base_url = base_url.to_string();
			let old_etag = row.etag.clone();
			tokio::spawn(async move {
				this.revalidate(&tileset_id, &base_url, &upstream_url, old_etag.as_deref()).await;
			});
		}

		Ok(rewrite_tiles(row.tilejson, base_url, tileset_id))
	}

	async fn revalidate(self: &Arc<Self>, tileset_id: &str, base_url: &str, upstream_url: &str, etag: Option<&str>) {
		let result = self.upstream.get_upstream(upstream_url, ResponseType::Json, etag).await;
		let response = match result {
			Ok(response) => response,
			Err(err) => {
				log::debug!("background tileset revalidation for '{tileset_id}' skipped: {err}");
				return;
			}
		};

		let new_tilejson = match response.body.into_json() {
			Ok(value) => value,
			Err(err) => {
				log::warn!("background tileset revalidation for '{tileset_id}' returned invalid JSON: {err}");
				return;
			}
		};

		if let Err(err) = self.put(tileset_id, new_tilejson, base_url, response.etag) {
			log::warn!("failed to persist revalidated tileset '{tileset_id}': {err}");
		}
	}

	pub fn put(&self, tileset_id: &str, tilejson: Value, base_url: &str, etag: Option<String>) -> AppResult<Value> {
		let body_id = tilejson.get("id").and_then(Value::as_str).unwrap_or_default();
		if body_id != tileset_id {
			return Err(AppError::MismatchedId { url_id: tileset_id.to_string(), body_id: body_id.to_string() });
		}

		let mut existing = self.store.get_tileset(tileset_id).map_err(AppError::Internal)?.ok_or(AppError::NotFound)?;
		let format = tj::validate_tilejson(&tilejson).map_err(|e| AppError::UpstreamJsonValidation(e.to_string()))?;

		existing.tilejson = tilejson.clone();
		existing.format = format.as_str().to_string();
		existing.upstream_tile_urls = tilejson
			.get("tiles")
			.and_then(Value::as_array)
			.map(|a| a.iter().filter_map(Value::as_str).map(str::to_owned).collect());
		if let Some(etag) = etag {
			existing.etag = Some(etag);
		}

		self.store.upsert_tileset(&existing).map_err(AppError::Internal)?;
		self.invalidate(tileset_id);

		Ok(rewrite_tiles(tilejson, base_url, tileset_id))
	}

	/// Malformed stored JSON rows are skipped rather than failing the whole
	/// listing.
	pub fn list(&self, base_url: &str) -> AppResult<Vec<Value>> {
		let rows = self.store.list_tilesets().map_err(AppError::Internal)?;
		Ok(rows
			.into_iter()
			.filter(|row| !row.tilejson.is_null())
			.map(|row| rewrite_tiles(row.tilejson, base_url, &row.id))
			.collect())
	}

	pub fn get_info(&self, tileset_id: &str) -> AppResult<TilesetInfo> {
		if let Some(cached) = self.info_cache.lock().unwrap().get(tileset_id) {
			return Ok(cached.clone());
		}

		let row = self.store.get_tileset(tileset_id).map_err(AppError::Internal)?.ok_or(AppError::NotFound)?;
		let info = (row.tilejson, row.upstream_tile_urls);
		self.info_cache.lock().unwrap().put(tileset_id.to_string(), info.clone());
		Ok(info)
	}

	fn invalidate(&self, tileset_id: &str) {
		self.info_cache.lock().unwrap().pop(tileset_id);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use std::time::Duration;

	fn service() -> Arc<TilesetsService> {
		let store = Arc::new(Store::open_in_memory().unwrap());
		let upstream = UpstreamManager::new("tilekeep-test/0.1", Duration::from_secs(5)).unwrap();
		TilesetsService::new(store, upstream)
	}

	fn sample_tilejson() -> Value {
		json!({"tilejson": "2.2.0", "tiles": ["http://a.example/{z}/{x}/{y}"], "format": "png"})
	}

	#[test]
	fn create_rewrites_tiles_to_local_url() {
		let svc = service();
		let result = svc.create(sample_tilejson(), "http://localhost:8080", None, None).unwrap();
		let id = result["id"].as_str().unwrap().to_string();
		assert_eq!(result["tiles"][0], json!(format!("http://localhost:8080/tilesets/{id}/{{z}}/{{x}}/{{y}}")));
	}

	#[test]
	fn create_rejects_duplicate_id() {
		let svc = service();
		svc.create(sample_tilejson(), "http://localhost:8080", None, None).unwrap();
		let err = svc.create(sample_tilejson(), "http://localhost:8080", None, None).unwrap_err();
		assert!(matches!(err, AppError::AlreadyExists));
	}

	#[test]
	fn put_requires_matching_id() {
		let svc = service();
		let created = svc.create(sample_tilejson(), "http://localhost:8080", None, None).unwrap();
		let id = created["id"].as_str().unwrap().to_string();

		let mut body = sample_tilejson();
		body["id"] = json!("someone-else");
		let err = svc.put(&id, body, "http://localhost:8080", None).unwrap_err();
		assert!(matches!(err, AppError::MismatchedId { .. }));
	}

	#[test]
	fn get_info_is_memoised_and_invalidated_on_put() {
		let svc = service();
		let created = svc.create(sample_tilejson(), "http://localhost:8080", None, None).unwrap();
		let id = created["id"].as_str().unwrap().to_string();

		let (tilejson, _) = svc.get_info(&id).unwrap();
		assert_eq!(tilejson["format"], json!("png"));

		let mut updated = sample_tilejson();
		updated["id"] = json!(id);
		updated["format"] = json!("pbf");
		updated["vector_layers"] = json!([{"id": "layer"}]);
		svc.put(&id, updated, "http://localhost:8080", None).unwrap();

		let (tilejson, _) = svc.get_info(&id).unwrap();
		assert_eq!(tilejson["format"], json!("pbf"));
	}
}
