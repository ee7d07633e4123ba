//! Row structs mirroring the schema in `migrations/0001_init/up.sql`.
//!
//! JSON-bearing columns stay as [`serde_json::Value`]; the store never
//! parses them into typed structs, since validation and interpretation of
//! TileJSON/Style documents belongs to `tilekeep_core::json` and the
//! services layer, not the storage layer.

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct Tileset {
	pub id: String,
	pub tilejson: Value,
	pub format: String,
	pub upstream_tile_urls: Option<Vec<String>>,
	pub upstream_url: Option<String>,
	pub etag: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TileData {
	pub tile_hash: String,
	pub tileset_id: String,
	pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Tile {
	pub quad_key: String,
	pub tileset_id: String,
	pub tile_hash: String,
	pub etag: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Style {
	pub id: String,
	pub stylejson: Value,
	pub source_id_to_tileset_id: Value,
	pub sprite_id: Option<String>,
	pub etag: Option<String>,
	pub upstream_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Sprite {
	pub id: String,
	pub pixel_density: i64,
	pub data: Vec<u8>,
	pub layout: Value,
	pub etag: Option<String>,
	pub upstream_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OfflineArea {
	pub id: String,
	pub zoom_level: Option<i64>,
	pub bounding_box: Option<String>,
	pub name: Option<String>,
	pub style_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
	Active,
	Complete,
	Error,
}

impl ImportState {
	pub fn as_str(self) -> &'static str {
		match self {
			ImportState::Active => "active",
			ImportState::Complete => "complete",
			ImportState::Error => "error",
		}
	}

	pub fn parse(s: &str) -> anyhow::Result<ImportState> {
		match s {
			"active" => Ok(ImportState::Active),
			"complete" => Ok(ImportState::Complete),
			"error" => Ok(ImportState::Error),
			other => anyhow::bail!("unknown import state: {other}"),
		}
	}
}

#[derive(Debug, Clone)]
pub struct Import {
	pub id: String,
	pub state: ImportState,
	pub error: Option<String>,
	pub started: i64,
	pub last_updated: Option<i64>,
	pub finished: Option<i64>,
	pub imported_resources: i64,
	pub total_resources: i64,
	pub imported_bytes: Option<i64>,
	pub total_bytes: Option<i64>,
	pub area_id: String,
	pub tileset_id: Option<String>,
	pub import_type: String,
}
