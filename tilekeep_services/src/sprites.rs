//! Sprite CRUD and parallel upstream fetch.

use crate::upstream::{ResponseType, UpstreamManager};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tilekeep_core::error::{AppError, AppResult};
use tilekeep_store::Store;
use tilekeep_store::models::Sprite;

pub struct SpritesService {
	store: Arc<Store>,
	upstream: Arc<UpstreamManager>,
}

pub struct FetchedSprite {
	pub layout: Value,
	pub data: Vec<u8>,
	pub etag: Option<String>,
}

impl SpritesService {
	pub fn new(store: Arc<Store>, upstream: Arc<UpstreamManager>) -> Arc<SpritesService> {
		Arc::new(SpritesService { store, upstream })
	}

	pub fn create(&self, sprite: &Sprite) -> AppResult<()> {
		if self.store.get_sprite(&sprite.id, sprite.pixel_density).map_err(AppError::Internal)?.is_some() {
			return Err(AppError::AlreadyExists);
		}
		self.store.upsert_sprite(sprite).map_err(AppError::Internal)
	}

	pub fn get(&self, id: &str, pixel_density: i64, allow_fallback: bool) -> AppResult<Sprite> {
		let found = if allow_fallback {
			self.store.get_sprite_with_fallback(id, pixel_density).map_err(AppError::Internal)?
		} else {
			self.store.get_sprite(id, pixel_density).map_err(AppError::Internal)?
		};
		found.ok_or(AppError::NotFound)
	}

	pub fn update(&self, sprite: &Sprite) -> AppResult<()> {
		self.store.get_sprite(&sprite.id, sprite.pixel_density).map_err(AppError::Internal)?.ok_or(AppError::NotFound)?;
		self.store.upsert_sprite(sprite).map_err(AppError::Internal)
	}

	pub fn delete(&self, id: &str, pixel_density: Option<i64>) -> AppResult<()> {
		self.store.delete_sprite(id, pixel_density).map_err(AppError::Internal)
	}

	/// Fetch `{url}.json`+`{url}.png` and `{url}@2x.json`+`{url}@2x.png` in
	/// parallel; a density is only present in the result when both halves of
	/// its pair succeed.
	pub async fn fetch_upstream(&self, url: &str, access_token: Option<&str>, etag: Option<&str>) -> AppResult<HashMap<i64, FetchedSprite>> {
		let (density_1, density_2) = tokio::join!(
			self.fetch_density(url, "", access_token, etag),
			self.fetch_density(url, "@2x", access_token, etag),
		);

		let mut result = HashMap::new();
		if let Some(sprite) = density_1? {
			result.insert(1, sprite);
		}
		if let Some(sprite) = density_2? {
			result.insert(2, sprite);
		}
		Ok(result)
	}

	async fn fetch_density(&self, base_url: &str, suffix: &str, access_token: Option<&str>, etag: Option<&str>) -> AppResult<Option<FetchedSprite>> {
		let mut json_url = format!("{base_url}{suffix}.json");
		let mut png_url = format!("{base_url}{suffix}.png");
		if let Some(token) = access_token {
			json_url = format!("{json_url}?access_token={token}");
			png_url = format!("{png_url}?access_token={token}");
		}

		let (layout_result, data_result) = tokio::join!(
			self.upstream.get_upstream(&json_url, ResponseType::Json, etag),
			self.upstream.get_upstream(&png_url, ResponseType::Buffer, etag),
		);

		let (layout_response, data_response) = match (layout_result, data_result) {
			(Ok(layout), Ok(data)) => (layout, data),
			_ => return Ok(None),
		};

		let layout = layout_response.body.into_json().map_err(|e| AppError::UpstreamJsonValidation(e.to_string()))?;
		let data = data_response.body.into_bytes().to_vec();

		Ok(Some(FetchedSprite { layout, data, etag: data_response.etag }))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	fn service() -> Arc<SpritesService> {
		let store = Arc::new(Store::open_in_memory().unwrap());
		let upstream = UpstreamManager::new("tilekeep-test/0.1", Duration::from_secs(5)).unwrap();
		SpritesService::new(store, upstream)
	}

	fn sample_sprite(density: i64) -> Sprite {
		Sprite {
			id: "sprite1".to_string(),
			pixel_density: density,
			data: vec![1, 2, 3],
			layout: serde_json::json!({"icon": {"x": 0, "y": 0, "width": 1, "height": 1}}),
			etag: None,
			upstream_url: None,
		}
	}

	#[test]
	fn create_rejects_duplicate_density() {
		let svc = service();
		svc.create(&sample_sprite(1)).unwrap();
		let err = svc.create(&sample_sprite(1)).unwrap_err();
		assert!(matches!(err, AppError::AlreadyExists));
	}

	#[test]
	fn get_without_fallback_requires_exact_density() {
		let svc = service();
		svc.create(&sample_sprite(1)).unwrap();
		let err = svc.get("sprite1", 2, false).unwrap_err();
		assert!(matches!(err, AppError::NotFound));
	}

	#[test]
	fn get_with_fallback_picks_highest_density_at_or_below_request() {
		let svc = service();
		svc.create(&sample_sprite(1)).unwrap();
		let sprite = svc.get("sprite1", 2, true).unwrap();
		assert_eq!(sprite.pixel_density, 1);
	}

	#[test]
	fn delete_without_density_removes_all_rows() {
		let svc = service();
		svc.create(&sample_sprite(1)).unwrap();
		svc.create(&sample_sprite(2)).unwrap();
		svc.delete("sprite1", None).unwrap();
		assert!(svc.get("sprite1", 1, false).is_err());
		assert!(svc.get("sprite1", 2, false).is_err());
	}
}
