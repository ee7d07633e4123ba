//! Style CRUD, offline-source materialisation and cascading delete.

use crate::tilesets::TilesetsService;
use crate::upstream::{ResponseType, UpstreamManager};
use serde_json::{Value, json};
use std::sync::Arc;
use tilekeep_core::error::{AppError, AppResult};
use tilekeep_core::{id, json as tj};
use tilekeep_store::Store;
use tilekeep_store::models::Style;

pub struct StylesService {
	store: Arc<Store>,
	upstream: Arc<UpstreamManager>,
	tilesets: Arc<TilesetsService>,
}

#[derive(Default)]
pub struct CreateStyleOptions {
	pub access_token: Option<String>,
	pub etag: Option<String>,
	pub id: Option<String>,
	pub upstream_url: Option<String>,
}

impl StylesService {
	pub fn new(store: Arc<Store>, upstream: Arc<UpstreamManager>, tilesets: Arc<TilesetsService>) -> Arc<StylesService> {
		Arc::new(StylesService { store, upstream, tilesets })
	}

	pub async fn create(&self, style: Value, base_url: &str, opts: CreateStyleOptions) -> AppResult<Value> {
		tj::validate_style(&style).map_err(|e| AppError::UnsupportedSource(e.to_string()))?;

		let style_id = match opts.id {
			Some(id) => id,
			None => match &opts.upstream_url {
				Some(url) => id::style_id_from_url(url).map_err(AppError::Internal)?,
				None => id::generate_id(),
			},
		};

		if self.store.get_style(&style_id).map_err(AppError::Internal)?.is_some() {
			return Err(AppError::AlreadyExists);
		}

		let mapping = self.materialise_sources(&style, base_url, opts.access_token.as_deref()).await?;

		let sprite_id = style
			.get("sprite")
			.and_then(Value::as_str)
			.map(|sprite| id::encode_base32(&id::hash(sprite.as_bytes())));

		let mapping_value = Value::Object(mapping.iter().map(|(k, v)| (k.clone(), json!(v))).collect());

		let row = Style {
			id: style_id.clone(),
			stylejson: style.clone(),
			source_id_to_tileset_id: mapping_value.clone(),
			sprite_id: sprite_id.clone(),
			etag: opts.etag,
			upstream_url: opts.upstream_url,
		};
		self.store.upsert_style(&row).map_err(AppError::Internal)?;

		Ok(json!({
			"id": style_id,
			"style": add_offline_urls(&style, base_url, &style_id, sprite_id.as_deref(), &mapping),
		}))
	}

	/// Build a minimal single-source style for a freshly-imported tileset.
	pub fn create_for_tileset(&self, tileset_id: &str, format: &str, has_vector_layers: bool, name: Option<String>) -> AppResult<String> {
		let style_id = id::style_id_from_tileset(tileset_id);
		let is_vector = format == "pbf" && has_vector_layers;
		let source_type = if is_vector { "vector" } else { "raster" };
		let display_name = name.unwrap_or_else(|| format!("Style {}", &tileset_id[tileset_id.len().saturating_sub(4)..]));

		let mut layers = Vec::new();
		if !is_vector {
			layers.push(json!({"id": "tiles", "type": "raster", "source": "tilekeep"}));
		}

		let style = json!({
			"version": 8,
			"name": display_name,
			"sources": {
				"tilekeep": {"type": source_type, "url": format!("tileset:{tileset_id}")},
			},
			"layers": layers,
		});

		let mapping = json!({"tilekeep": tileset_id});
		let row = Style {
			id: style_id.clone(),
			stylejson: style,
			source_id_to_tileset_id: mapping,
			sprite_id: None,
			etag: None,
			upstream_url: None,
		};
		self.store.upsert_style(&row).map_err(AppError::Internal)?;
		Ok(style_id)
	}

	pub fn get(&self, style_id: &str, base_url: &str) -> AppResult<Value> {
		let row = self.store.get_style(style_id).map_err(AppError::Internal)?.ok_or(AppError::NotFound)?;
		let mapping = object_string_map(&row.source_id_to_tileset_id);
		Ok(add_offline_urls(&row.stylejson, base_url, style_id, row.sprite_id.as_deref(), &mapping))
	}

	pub async fn update(&self, style_id: &str, style: Value, base_url: &str, opts: CreateStyleOptions) -> AppResult<Value> {
		tj::validate_style(&style).map_err(|e| AppError::UnsupportedSource(e.to_string()))?;
		self.store.get_style(style_id).map_err(AppError::Internal)?.ok_or(AppError::NotFound)?;

		let mapping = self.materialise_sources(&style, base_url, opts.access_token.as_deref()).await?;
		let sprite_id = style
			.get("sprite")
			.and_then(Value::as_str)
			.map(|sprite| id::encode_base32(&id::hash(sprite.as_bytes())));
		let mapping_value = Value::Object(mapping.iter().map(|(k, v)| (k.clone(), json!(v))).collect());

		let row = Style {
			id: style_id.to_string(),
			stylejson: style.clone(),
			source_id_to_tileset_id: mapping_value,
			sprite_id: sprite_id.clone(),
			etag: opts.etag,
			upstream_url: opts.upstream_url,
		};
		self.store.upsert_style(&row).map_err(AppError::Internal)?;

		Ok(add_offline_urls(&style, base_url, style_id, sprite_id.as_deref(), &mapping))
	}

	pub fn list(&self, base_url: &str) -> AppResult<Vec<Value>> {
		let rows = self.store.list_styles().map_err(AppError::Internal)?;
		let mut out = Vec::with_capacity(rows.len());
		for row in rows {
			let name = row.stylejson.get("name").and_then(Value::as_str).unwrap_or(&row.id).to_string();
			let mapping = object_string_map(&row.source_id_to_tileset_id);
			let mut bytes_stored = 0i64;
			for tileset_id in mapping.values() {
				bytes_stored += self.store.tileset_bytes_stored(tileset_id).map_err(AppError::Internal)?;
			}
			out.push(json!({
				"id": row.id,
				"name": name,
				"bytesStored": bytes_stored,
				"url": format!("{base_url}/styles/{}", row.id),
			}));
		}
		Ok(out)
	}

	pub fn delete(&self, style_id: &str) -> AppResult<()> {
		self.store.get_style(style_id).map_err(AppError::Internal)?.ok_or(AppError::NotFound)?;
		self.store.delete_style(style_id).map_err(AppError::Internal)?;
		Ok(())
	}

	async fn materialise_sources(&self, style: &Value, base_url: &str, access_token: Option<&str>) -> AppResult<Vec<(String, String)>> {
		let mut mapping = Vec::new();

		for (source_id, source) in tj::style_sources(style) {
			let source_type = source.get("type").and_then(Value::as_str);
			if source_type != Some("raster") {
				return Err(AppError::UnsupportedSource(format!("source '{source_id}' has unsupported type {source_type:?}")));
			}

			let url = source.get("url").and_then(Value::as_str).ok_or_else(|| AppError::UnsupportedSource(format!("source '{source_id}' is missing 'url'")))?;

			if tj::is_mapbox_url(url) && access_token.is_none() {
				return Err(AppError::MbAccessTokenRequired);
			}

			let normalised_url = if tj::is_mapbox_url(url) {
				tj::with_access_token(url, access_token.unwrap()).map_err(AppError::Internal)?
			} else {
				url.to_string()
			};

			let response = self
				.upstream
				.get_upstream(&normalised_url, ResponseType::Json, None)
				.await
				.map_err(|e| AppError::UnsupportedSource(format!("source '{source_id}': {e}")))?;
			let tilejson = response.body.into_json().map_err(|e| AppError::UnsupportedSource(e.to_string()))?;
			tj::validate_tilejson(&tilejson).map_err(|e| AppError::UnsupportedSource(e.to_string()))?;

			let tileset_id = id::tileset_id(&tilejson).map_err(AppError::Internal)?;
			if self.store.get_tileset(&tileset_id).map_err(AppError::Internal)?.is_none() {
				match self.tilesets.create(tilejson, base_url, response.etag.clone(), Some(normalised_url.clone())) {
					Ok(_) | Err(AppError::AlreadyExists) => {}
					Err(err) => return Err(err),
				}
			}

			mapping.push((source_id, tileset_id));
		}

		Ok(mapping)
	}
}

fn object_string_map(value: &Value) -> Vec<(String, String)> {
	value.as_object().into_iter().flat_map(|m| m.iter()).filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect()
}

fn add_offline_urls(style: &Value, base_url: &str, style_id: &str, sprite_id: Option<&str>, mapping: &[(String, String)]) -> Value {
	let mut style = style.clone();

	if let Some(sources) = style.get_mut("sources").and_then(Value::as_object_mut) {
		for (source_id, tileset_id) in mapping {
			if let Some(source) = sources.get_mut(source_id).and_then(Value::as_object_mut) {
				let source_type = source.get("type").and_then(Value::as_str).unwrap_or_default();
				if matches!(source_type, "vector" | "raster" | "raster-dem") {
					source.insert("url".to_string(), json!(format!("{base_url}/tilesets/{tileset_id}")));
				}
			}
		}
	}

	if let Some(obj) = style.as_object_mut() {
		if let Some(sprite_id) = sprite_id {
			obj.insert("sprite".to_string(), json!(format!("{base_url}/styles/{style_id}/sprites/{sprite_id}")));
		}
		if obj.contains_key("glyphs") {
			obj.insert("glyphs".to_string(), json!(format!("{base_url}/fonts/{{fontstack}}/{{range}}.pbf?styleId={style_id}")));
		}
	}

	style
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn services(store: Arc<Store>, upstream: Arc<UpstreamManager>) -> (Arc<TilesetsService>, Arc<StylesService>) {
		let tilesets = TilesetsService::new(Arc::clone(&store), Arc::clone(&upstream));
		let styles = StylesService::new(store, upstream, Arc::clone(&tilesets));
		(tilesets, styles)
	}

	#[tokio::test]
	async fn create_rejects_mapbox_source_without_token() {
		let store = Arc::new(Store::open_in_memory().unwrap());
		let upstream = UpstreamManager::new("tilekeep-test/0.1", Duration::from_secs(5)).unwrap();
		let (_tilesets, styles) = services(store, upstream);

		let style = json!({
			"version": 8,
			"sources": {"a": {"type": "raster", "url": "http://a.tiles.mapbox.com/v3/x.json"}},
			"layers": [],
		});

		let err = styles.create(style, "http://localhost", CreateStyleOptions::default()).await.unwrap_err();
		assert!(matches!(err, AppError::MbAccessTokenRequired));
	}

	#[tokio::test]
	async fn create_materialises_raster_source_and_rewrites_url() {
		let server = MockServer::start().await;
		let tilejson = json!({"tilejson": "2.2.0", "tiles": [format!("{}/tiles/{{z}}/{{x}}/{{y}}", server.uri())], "format": "png"});
		Mock::given(method("GET")).and(path("/source.json")).respond_with(ResponseTemplate::new(200).set_body_json(&tilejson)).mount(&server).await;

		let store = Arc::new(Store::open_in_memory().unwrap());
		let upstream = UpstreamManager::new("tilekeep-test/0.1", Duration::from_secs(5)).unwrap();
		let (_tilesets, styles) = services(store, upstream);

		let style = json!({
			"version": 8,
			"sources": {"a": {"type": "raster", "url": format!("{}/source.json", server.uri())}},
			"layers": [],
		});

		let result = styles.create(style, "http://localhost", CreateStyleOptions::default()).await.unwrap();
		let rewritten_url = result["style"]["sources"]["a"]["url"].as_str().unwrap();
		assert!(rewritten_url.starts_with("http://localhost/tilesets/"));
	}

	#[tokio::test]
	async fn create_twice_with_same_explicit_id_conflicts() {
		let store = Arc::new(Store::open_in_memory().unwrap());
		let upstream = UpstreamManager::new("tilekeep-test/0.1", Duration::from_secs(5)).unwrap();
		let (_tilesets, styles) = services(store, upstream);

		let style = json!({"version": 8, "sources": {}, "layers": []});
		let opts = CreateStyleOptions { id: Some("fixed-id".to_string()), ..Default::default() };
		styles.create(style.clone(), "http://localhost", opts).await.unwrap();

		let opts = CreateStyleOptions { id: Some("fixed-id".to_string()), ..Default::default() };
		let err = styles.create(style, "http://localhost", opts).await.unwrap_err();
		assert!(matches!(err, AppError::AlreadyExists));
	}

	#[tokio::test]
	async fn delete_removes_style_and_uniquely_owned_tileset() {
		let store = Arc::new(Store::open_in_memory().unwrap());
		let upstream = UpstreamManager::new("tilekeep-test/0.1", Duration::from_secs(5)).unwrap();
		let (tilesets, styles) = services(Arc::clone(&store), upstream);

		let tilejson = json!({"id": "only-mine", "tilejson": "2.2.0", "tiles": ["http://x/{z}/{x}/{y}"], "format": "png"});
		let created = tilesets.create(tilejson, "http://localhost", None, None).unwrap();
		let tileset_id = created["id"].as_str().unwrap().to_string();

		let opts = CreateStyleOptions { id: Some("s1".to_string()), ..Default::default() };
		styles.create(json!({"version": 8, "sources": {}, "layers": []}), "http://localhost", opts).await.unwrap();
		store
			.upsert_style(&Style {
				id: "s1".to_string(),
				stylejson: json!({"version": 8, "sources": {}, "layers": []}),
				source_id_to_tileset_id: json!({"a": tileset_id}),
				sprite_id: None,
				etag: None,
				upstream_url: None,
			})
			.unwrap();

		styles.delete("s1").unwrap();
		assert!(store.get_style("s1").unwrap().is_none());
		assert!(store.get_tileset(&tileset_id).unwrap().is_none());
	}
}
