//! MBTiles metadata extraction (spec glossary: `metadata(name, value)`, with
//! an optional `json` row merging extra TileJSON keys such as
//! `vector_layers`).

use r2d2_sqlite::rusqlite::{Connection, OpenFlags};
use serde_json::{Map, Value, json};
use std::path::Path;

pub fn open_read_only(path: &Path) -> anyhow::Result<Connection> {
	Ok(Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?)
}

pub fn extract_tilejson(path: &Path) -> anyhow::Result<Value> {
	let conn = open_read_only(path)?;
	extract_tilejson_from_conn(&conn, path)
}

/// Build a TileJSON document from an MBTiles `metadata` table. There is no
/// natural upstream URL for a local import, so `tiles` is populated with a
/// synthetic, file-derived template solely so `tilesetId` derivation (spec
/// §3) has something deterministic to hash.
pub fn extract_tilejson_from_conn(conn: &Connection, path: &Path) -> anyhow::Result<Value> {
	let mut stmt = conn.prepare("SELECT name, value FROM metadata")?;
	let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

	let mut fields = Map::new();
	let mut extra_json: Option<Value> = None;

	for row in rows {
		let (name, value) = row?;
		if name == "json" {
			extra_json = serde_json::from_str(&value).ok();
			continue;
		}
		fields.insert(name, json!(value));
	}

	if let Some(Value::Object(extra)) = extra_json {
		for (k, v) in extra {
			fields.insert(k, v);
		}
	}

	for numeric_field in ["minzoom", "maxzoom"] {
		if let Some(value) = fields.get(numeric_field).and_then(Value::as_str).and_then(|s| s.parse::<i64>().ok()) {
			fields.insert(numeric_field.to_string(), json!(value));
		}
	}
	if let Some(bounds) = fields.get("bounds").and_then(Value::as_str) {
		let parsed: Vec<f64> = bounds.split(',').filter_map(|s| s.trim().parse().ok()).collect();
		if parsed.len() == 4 {
			fields.insert("bounds".to_string(), json!(parsed));
		}
	}

	fields.entry("tilejson".to_string()).or_insert_with(|| json!("2.2.0"));
	let format = fields.get("format").and_then(Value::as_str).unwrap_or("png").to_string();
	fields.insert("format".to_string(), json!(format));

	let file_stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "import".to_string());
	fields.insert("tiles".to_string(), json!([format!("mbtiles://{file_stem}/{{z}}/{{x}}/{{y}}")]));

	Ok(Value::Object(fields))
}

pub fn total_tiles_and_bytes(conn: &Connection) -> anyhow::Result<(i64, i64)> {
	let total_tiles: i64 = conn.query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get(0))?;
	let total_bytes: i64 = conn.query_row("SELECT COALESCE(SUM(LENGTH(tile_data)), 0) FROM tiles", [], |row| row.get(0))?;
	Ok((total_tiles, total_bytes))
}
