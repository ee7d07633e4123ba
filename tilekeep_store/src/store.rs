//! The embedded SQLite store: a pooled connection, the migrator, and
//! prepared-statement-backed CRUD for tilesets, styles, tiles and imports.
//!
//! One pooled SQLite connection, WAL + incremental auto-vacuum pragmas set
//! once at open, and every read/write expressed as a short prepared
//! statement rather than an ORM layer.

use crate::migrator;
use crate::models::{Import, ImportState, OfflineArea, Sprite, Style, Tileset};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use r2d2_sqlite::rusqlite::{OptionalExtension, Transaction, params};
use serde_json::Value;
use std::path::Path;
use tilekeep_core::id;
use time::OffsetDateTime;

pub struct Store {
	pool: Pool<SqliteConnectionManager>,
}

fn now_millis() -> i64 {
	(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn json_text(value: &Value) -> String {
	value.to_string()
}

fn parse_json(text: &str) -> anyhow::Result<Value> {
	Ok(serde_json::from_str(text)?)
}

impl Store {
	/// Open (creating if absent) the SQLite database at `path`, run pending
	/// migrations, and sweep any `imports` row left `active` by an unclean
	/// shutdown into `error`.
	pub fn open(path: &Path) -> anyhow::Result<Store> {
		let manager = SqliteConnectionManager::file(path).with_init(|conn| {
			conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA auto_vacuum=INCREMENTAL; PRAGMA foreign_keys=ON;")
		});
		let pool = Pool::builder().build(manager)?;
		let store = Store { pool };

		let conn = store.conn()?;
		migrator::run(&conn)?;
		drop(conn);

		store.sweep_stale_imports()?;
		Ok(store)
	}

	/// In-memory store for tests.
	pub fn open_in_memory() -> anyhow::Result<Store> {
		let manager = SqliteConnectionManager::memory();
		let pool = Pool::builder().max_size(1).build(manager)?;
		let store = Store { pool };
		let conn = store.conn()?;
		migrator::run(&conn)?;
		drop(conn);
		Ok(store)
	}

	pub fn conn(&self) -> anyhow::Result<PooledConnection<SqliteConnectionManager>> {
		Ok(self.pool.get()?)
	}

	fn with_tx<T>(&self, f: impl FnOnce(&Transaction) -> anyhow::Result<T>) -> anyhow::Result<T> {
		let mut conn = self.conn()?;
		let tx = conn.transaction()?;
		let result = f(&tx)?;
		tx.commit()?;
		Ok(result)
	}

	/// Any `imports` row still `active` at open time belongs to a process
	/// that died mid-import; it can never make further progress.
	fn sweep_stale_imports(&self) -> anyhow::Result<()> {
		let conn = self.conn()?;
		let swept = conn.execute(
			"UPDATE imports SET state = 'error', error = 'UNKNOWN', last_updated = ?1
			 WHERE state = 'active'",
			params![now_millis()],
		)?;
		if swept > 0 {
			log::warn!("swept {swept} stale active import(s) into error state on startup");
		}
		Ok(())
	}

	// --- tilesets ---------------------------------------------------------

	pub fn upsert_tileset(&self, tileset: &Tileset) -> anyhow::Result<()> {
		let conn = self.conn()?;
		conn.execute(
			"INSERT INTO tilesets (id, tilejson, format, upstream_tile_urls, upstream_url, etag)
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
			 ON CONFLICT(id) DO UPDATE SET
				tilejson = excluded.tilejson,
				format = excluded.format,
				upstream_tile_urls = excluded.upstream_tile_urls,
				upstream_url = excluded.upstream_url,
				etag = excluded.etag",
			params![
				tileset.id,
				json_text(&tileset.tilejson),
				tileset.format,
				tileset.upstream_tile_urls.as_ref().map(|v| json_text(&Value::from(v.clone()))),
				tileset.upstream_url,
				tileset.etag,
			],
		)?;
		Ok(())
	}

	pub fn get_tileset(&self, id: &str) -> anyhow::Result<Option<Tileset>> {
		let conn = self.conn()?;
		conn.query_row(
			"SELECT id, tilejson, format, upstream_tile_urls, upstream_url, etag FROM tilesets WHERE id = ?1",
			params![id],
			row_to_tileset,
		)
		.optional()
		.map_err(Into::into)
	}

	pub fn list_tilesets(&self) -> anyhow::Result<Vec<Tileset>> {
		let conn = self.conn()?;
		let mut stmt = conn.prepare("SELECT id, tilejson, format, upstream_tile_urls, upstream_url, etag FROM tilesets")?;
		let rows = stmt.query_map([], row_to_tileset)?.collect::<Result<Vec<_>, _>>()?;
		Ok(rows)
	}

	/// Delete a tileset and every `tiles`/`tile_data` row that references it.
	/// Orphaned `tile_data` rows (content no other tileset shares) are
	/// removed with the corpus's `NOT IN (SELECT ... EXCEPT ...)` idiom so
	/// dedup never leaves unreachable blobs behind.
	pub fn delete_tileset(&self, id: &str) -> anyhow::Result<()> {
		self.with_tx(|tx| delete_tileset_tx(tx, id))
	}

	// --- tiles / tile_data (content-addressed, deduplicated) --------------

	/// Store `data` under the tileset, deduplicating by content hash: two
	/// identical tile bodies within the same tileset share one `tile_data`
	/// row. Returns the tile's content hash.
	pub fn upsert_tile(&self, tileset_id: &str, quad_key: &str, data: &[u8], etag: Option<&str>) -> anyhow::Result<String> {
		self.with_tx(|tx| upsert_tile_tx(tx, tileset_id, quad_key, data, etag))
	}

	/// Upsert a tile and advance its import's progress counters in one
	/// transaction, so a crash mid-row can never leave `tiles`/`tile_data`
	/// ahead of the `imports` counters that describe them.
	pub fn upsert_tile_and_advance_import(
		&self,
		tileset_id: &str,
		quad_key: &str,
		data: &[u8],
		etag: Option<&str>,
		import_id: &str,
		imported_resources: i64,
		imported_bytes: Option<i64>,
	) -> anyhow::Result<String> {
		self.with_tx(|tx| {
			let tile_hash = upsert_tile_tx(tx, tileset_id, quad_key, data, etag)?;
			tx.execute(
				"UPDATE imports SET imported_resources = ?1, imported_bytes = ?2, last_updated = ?3 WHERE id = ?4",
				params![imported_resources, imported_bytes, now_millis(), import_id],
			)?;
			Ok(tile_hash)
		})
	}

	/// Fetch a tile's body and etag, joining `tiles` to `tile_data`.
	pub fn get_tile(&self, tileset_id: &str, quad_key: &str) -> anyhow::Result<Option<(Vec<u8>, Option<String>)>> {
		let conn = self.conn()?;
		conn.query_row(
			"SELECT d.data, t.etag FROM tiles t
			 JOIN tile_data d ON d.tile_hash = t.tile_hash AND d.tileset_id = t.tileset_id
			 WHERE t.tileset_id = ?1 AND t.quad_key = ?2",
			params![tileset_id, quad_key],
			|row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Option<String>>(1)?)),
		)
		.optional()
		.map_err(Into::into)
	}

	// --- styles -------------------------------------------------------------

	pub fn upsert_style(&self, style: &Style) -> anyhow::Result<()> {
		let conn = self.conn()?;
		conn.execute(
			"INSERT INTO styles (id, stylejson, source_id_to_tileset_id, sprite_id, etag, upstream_url)
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
			 ON CONFLICT(id) DO UPDATE SET
				stylejson = excluded.stylejson,
				source_id_to_tileset_id = excluded.source_id_to_tileset_id,
				sprite_id = excluded.sprite_id,
				etag = excluded.etag,
				upstream_url = excluded.upstream_url",
			params![
				style.id,
				json_text(&style.stylejson),
				json_text(&style.source_id_to_tileset_id),
				style.sprite_id,
				style.etag,
				style.upstream_url,
			],
		)?;
		Ok(())
	}

	pub fn get_style(&self, id: &str) -> anyhow::Result<Option<Style>> {
		let conn = self.conn()?;
		conn.query_row(
			"SELECT id, stylejson, source_id_to_tileset_id, sprite_id, etag, upstream_url FROM styles WHERE id = ?1",
			params![id],
			row_to_style,
		)
		.optional()
		.map_err(Into::into)
	}

	/// The style's `stylejson.glyphs` template, read directly via
	/// `json_extract` rather than parsing the whole document.
	pub fn style_glyphs_template(&self, style_id: &str) -> anyhow::Result<Option<String>> {
		let conn = self.conn()?;
		let value: Option<Option<String>> = conn
			.query_row("SELECT json_extract(stylejson, '$.glyphs') FROM styles WHERE id = ?1", params![style_id], |row| {
				row.get(0)
			})
			.optional()?;
		Ok(value.flatten())
	}

	pub fn list_styles(&self) -> anyhow::Result<Vec<Style>> {
		let conn = self.conn()?;
		let mut stmt =
			conn.prepare("SELECT id, stylejson, source_id_to_tileset_id, sprite_id, etag, upstream_url FROM styles")?;
		let rows = stmt.query_map([], row_to_style)?.collect::<Result<Vec<_>, _>>()?;
		Ok(rows)
	}

	/// Delete a style and, in the same transaction, cascade to every
	/// `tileset` it alone references, every `offline_area` that points at
	/// it, and its `sprite`. A crash anywhere in this call leaves the
	/// database exactly as it was before the call, never half-cascaded.
	pub fn delete_style(&self, id: &str) -> anyhow::Result<()> {
		self.with_tx(|tx| {
			let row: Option<(String, Option<String>)> = tx
				.query_row("SELECT source_id_to_tileset_id, sprite_id FROM styles WHERE id = ?1", params![id], |row| {
					Ok((row.get(0)?, row.get(1)?))
				})
				.optional()?;
			let Some((mapping_text, sprite_id)) = row else {
				return Ok(());
			};

			tx.execute(
				"DELETE FROM imports WHERE area_id IN (SELECT id FROM offline_areas WHERE style_id = ?1)",
				params![id],
			)?;
			tx.execute("DELETE FROM offline_areas WHERE style_id = ?1", params![id])?;
			tx.execute("DELETE FROM styles WHERE id = ?1", params![id])?;

			// Tilesets this style alone referenced: its own source mapping's
			// values, minus every value still reachable from a remaining style.
			let mut stmt = tx.prepare(
				"SELECT value FROM json_each(?1)
				 EXCEPT
				 SELECT value FROM styles, json_each(styles.source_id_to_tileset_id)",
			)?;
			let orphaned_tilesets: Vec<String> = stmt.query_map(params![mapping_text], |row| row.get(0))?.collect::<Result<Vec<_>, _>>()?;
			drop(stmt);

			for tileset_id in orphaned_tilesets {
				delete_tileset_tx(tx, &tileset_id)?;
			}

			if let Some(sprite_id) = sprite_id {
				delete_sprite_tx(tx, &sprite_id, None)?;
			}

			Ok(())
		})
	}

	// --- sprites --------------------------------------------------------

	pub fn upsert_sprite(&self, sprite: &Sprite) -> anyhow::Result<()> {
		let conn = self.conn()?;
		conn.execute(
			"INSERT INTO sprites (id, pixel_density, data, layout, etag, upstream_url)
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
			 ON CONFLICT(id, pixel_density) DO UPDATE SET
				data = excluded.data, layout = excluded.layout, etag = excluded.etag, upstream_url = excluded.upstream_url",
			params![sprite.id, sprite.pixel_density, sprite.data, json_text(&sprite.layout), sprite.etag, sprite.upstream_url],
		)?;
		Ok(())
	}

	pub fn get_sprite(&self, id: &str, pixel_density: i64) -> anyhow::Result<Option<Sprite>> {
		let conn = self.conn()?;
		conn.query_row(
			"SELECT id, pixel_density, data, layout, etag, upstream_url FROM sprites WHERE id = ?1 AND pixel_density = ?2",
			params![id, pixel_density],
			row_to_sprite,
		)
		.optional()
		.map_err(Into::into)
	}

	/// The highest `pixelDensity <= max_density` stored for `id`, or `None`.
	pub fn get_sprite_with_fallback(&self, id: &str, max_density: i64) -> anyhow::Result<Option<Sprite>> {
		let conn = self.conn()?;
		conn.query_row(
			"SELECT id, pixel_density, data, layout, etag, upstream_url FROM sprites
			 WHERE id = ?1 AND pixel_density <= ?2 ORDER BY pixel_density DESC LIMIT 1",
			params![id, max_density],
			row_to_sprite,
		)
		.optional()
		.map_err(Into::into)
	}

	pub fn delete_sprite(&self, id: &str, pixel_density: Option<i64>) -> anyhow::Result<()> {
		self.with_tx(|tx| delete_sprite_tx(tx, id, pixel_density))
	}

	/// Sum of stored tile bytes for a tileset, used by `StylesService::list`'s
	/// `bytesStored` field.
	pub fn tileset_bytes_stored(&self, tileset_id: &str) -> anyhow::Result<i64> {
		let conn = self.conn()?;
		let bytes: Option<i64> =
			conn.query_row("SELECT SUM(LENGTH(data)) FROM tile_data WHERE tileset_id = ?1", params![tileset_id], |row| {
				row.get(0)
			})?;
		Ok(bytes.unwrap_or(0))
	}

	// --- offline_areas ----------------------------------------------------

	pub fn upsert_offline_area(&self, area: &OfflineArea) -> anyhow::Result<()> {
		let conn = self.conn()?;
		conn.execute(
			"INSERT INTO offline_areas (id, zoom_level, bounding_box, name, style_id)
			 VALUES (?1, ?2, ?3, ?4, ?5)
			 ON CONFLICT(id) DO UPDATE SET
				zoom_level = excluded.zoom_level, bounding_box = excluded.bounding_box,
				name = excluded.name, style_id = excluded.style_id",
			params![area.id, area.zoom_level, area.bounding_box, area.name, area.style_id],
		)?;
		Ok(())
	}

	pub fn list_offline_areas_for_style(&self, style_id: &str) -> anyhow::Result<Vec<OfflineArea>> {
		let conn = self.conn()?;
		let mut stmt = conn.prepare(
			"SELECT id, zoom_level, bounding_box, name, style_id FROM offline_areas WHERE style_id = ?1",
		)?;
		let rows = stmt.query_map(params![style_id], row_to_offline_area)?.collect::<Result<Vec<_>, _>>()?;
		Ok(rows)
	}

	// --- imports ----------------------------------------------------------

	pub fn insert_import(&self, import: &Import) -> anyhow::Result<()> {
		let conn = self.conn()?;
		conn.execute(
			"INSERT INTO imports (id, state, error, started, last_updated, finished,
				imported_resources, total_resources, imported_bytes, total_bytes,
				area_id, tileset_id, import_type)
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
			params![
				import.id,
				import.state.as_str(),
				import.error,
				import.started,
				import.last_updated,
				import.finished,
				import.imported_resources,
				import.total_resources,
				import.imported_bytes,
				import.total_bytes,
				import.area_id,
				import.tileset_id,
				import.import_type,
			],
		)?;
		Ok(())
	}

	/// Throttled progress update: advances counters and `last_updated`
	/// without touching `state`.
	pub fn update_import_progress(&self, id: &str, imported_resources: i64, imported_bytes: Option<i64>) -> anyhow::Result<()> {
		let conn = self.conn()?;
		conn.execute(
			"UPDATE imports SET imported_resources = ?1, imported_bytes = ?2, last_updated = ?3 WHERE id = ?4",
			params![imported_resources, imported_bytes, now_millis(), id],
		)?;
		Ok(())
	}

	pub fn finish_import(&self, id: &str, state: ImportState, error: Option<&str>) -> anyhow::Result<()> {
		let conn = self.conn()?;
		let now = now_millis();
		conn.execute(
			"UPDATE imports SET state = ?1, error = ?2, finished = ?3, last_updated = ?3 WHERE id = ?4",
			params![state.as_str(), error, now, id],
		)?;
		Ok(())
	}

	pub fn get_import(&self, id: &str) -> anyhow::Result<Option<Import>> {
		let conn = self.conn()?;
		conn.query_row(
			"SELECT id, state, error, started, last_updated, finished, imported_resources,
				total_resources, imported_bytes, total_bytes, area_id, tileset_id, import_type
			 FROM imports WHERE id = ?1",
			params![id],
			row_to_import,
		)
		.optional()
		.map_err(Into::into)
	}

	pub fn list_imports_for_area(&self, area_id: &str) -> anyhow::Result<Vec<Import>> {
		let conn = self.conn()?;
		let mut stmt = conn.prepare(
			"SELECT id, state, error, started, last_updated, finished, imported_resources,
				total_resources, imported_bytes, total_bytes, area_id, tileset_id, import_type
			 FROM imports WHERE area_id = ?1 ORDER BY started DESC",
		)?;
		let rows = stmt.query_map(params![area_id], row_to_import)?.collect::<Result<Vec<_>, _>>()?;
		Ok(rows)
	}
}

fn delete_tileset_tx(tx: &Transaction, id: &str) -> anyhow::Result<()> {
	tx.execute("DELETE FROM tiles WHERE tileset_id = ?1", params![id])?;
	tx.execute(
		"DELETE FROM tile_data WHERE tileset_id = ?1 AND tile_hash NOT IN (
			SELECT tile_hash FROM tiles WHERE tileset_id != ?1
		)",
		params![id],
	)?;
	tx.execute("DELETE FROM tile_data WHERE tileset_id = ?1", params![id])?;
	tx.execute("DELETE FROM tilesets WHERE id = ?1", params![id])?;
	Ok(())
}

fn upsert_tile_tx(tx: &Transaction, tileset_id: &str, quad_key: &str, data: &[u8], etag: Option<&str>) -> anyhow::Result<String> {
	let tile_hash = id::encode_hex(&id::hash(data));
	tx.execute(
		"INSERT OR IGNORE INTO tile_data (tile_hash, tileset_id, data) VALUES (?1, ?2, ?3)",
		params![tile_hash, tileset_id, data],
	)?;
	tx.execute(
		"INSERT INTO tiles (quad_key, tileset_id, tile_hash, etag) VALUES (?1, ?2, ?3, ?4)
		 ON CONFLICT(quad_key, tileset_id) DO UPDATE SET tile_hash = excluded.tile_hash, etag = excluded.etag",
		params![quad_key, tileset_id, tile_hash, etag],
	)?;
	Ok(tile_hash)
}

fn delete_sprite_tx(tx: &Transaction, id: &str, pixel_density: Option<i64>) -> anyhow::Result<()> {
	match pixel_density {
		Some(density) => tx.execute("DELETE FROM sprites WHERE id = ?1 AND pixel_density = ?2", params![id, density])?,
		None => tx.execute("DELETE FROM sprites WHERE id = ?1", params![id])?,
	};
	Ok(())
}

fn row_to_tileset(row: &r2d2_sqlite::rusqlite::Row) -> r2d2_sqlite::rusqlite::Result<Tileset> {
	let tilejson_text: String = row.get(1)?;
	let upstream_tile_urls_text: Option<String> = row.get(3)?;
	Ok(Tileset {
		id: row.get(0)?,
		tilejson: parse_json(&tilejson_text).unwrap_or(Value::Null),
		format: row.get(2)?,
		upstream_tile_urls: upstream_tile_urls_text
			.and_then(|t| parse_json(&t).ok())
			.and_then(|v| v.as_array().map(|a| a.iter().filter_map(|e| e.as_str().map(str::to_owned)).collect())),
		upstream_url: row.get(4)?,
		etag: row.get(5)?,
	})
}

fn row_to_style(row: &r2d2_sqlite::rusqlite::Row) -> r2d2_sqlite::rusqlite::Result<Style> {
	let stylejson_text: String = row.get(1)?;
	let mapping_text: String = row.get(2)?;
	Ok(Style {
		id: row.get(0)?,
		stylejson: parse_json(&stylejson_text).unwrap_or(Value::Null),
		source_id_to_tileset_id: parse_json(&mapping_text).unwrap_or(Value::Null),
		sprite_id: row.get(3)?,
		etag: row.get(4)?,
		upstream_url: row.get(5)?,
	})
}

fn row_to_sprite(row: &r2d2_sqlite::rusqlite::Row) -> r2d2_sqlite::rusqlite::Result<Sprite> {
	let layout_text: String = row.get(3)?;
	Ok(Sprite {
		id: row.get(0)?,
		pixel_density: row.get(1)?,
		data: row.get(2)?,
		layout: parse_json(&layout_text).unwrap_or(Value::Null),
		etag: row.get(4)?,
		upstream_url: row.get(5)?,
	})
}

fn row_to_offline_area(row: &r2d2_sqlite::rusqlite::Row) -> r2d2_sqlite::rusqlite::Result<OfflineArea> {
	Ok(OfflineArea {
		id: row.get(0)?,
		zoom_level: row.get(1)?,
		bounding_box: row.get(2)?,
		name: row.get(3)?,
		style_id: row.get(4)?,
	})
}

fn row_to_import(row: &r2d2_sqlite::rusqlite::Row) -> r2d2_sqlite::rusqlite::Result<Import> {
	let state_text: String = row.get(1)?;
	Ok(Import {
		id: row.get(0)?,
		state: ImportState::parse(&state_text).unwrap_or(ImportState::Error),
		error: row.get(2)?,
		started: row.get(3)?,
		last_updated: row.get(4)?,
		finished: row.get(5)?,
		imported_resources: row.get(6)?,
		total_resources: row.get(7)?,
		imported_bytes: row.get(8)?,
		total_bytes: row.get(9)?,
		area_id: row.get(10)?,
		tileset_id: row.get(11)?,
		import_type: row.get(12)?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::models::{ImportState, Style, Tileset};
	use serde_json::json;

	fn sample_tileset(id: &str) -> Tileset {
		Tileset {
			id: id.to_string(),
			tilejson: json!({"tilejson": "2.2.0", "tiles": ["http://x/{z}/{x}/{y}"], "format": "png"}),
			format: "png".to_string(),
			upstream_tile_urls: Some(vec!["http://x/{z}/{x}/{y}".to_string()]),
			upstream_url: None,
			etag: None,
		}
	}

	#[test]
	fn round_trips_a_tileset() {
		let store = Store::open_in_memory().unwrap();
		store.upsert_tileset(&sample_tileset("ts1")).unwrap();
		let fetched = store.get_tileset("ts1").unwrap().unwrap();
		assert_eq!(fetched.id, "ts1");
		assert_eq!(fetched.format, "png");
	}

	#[test]
	fn upsert_tile_deduplicates_identical_bodies() {
		let store = Store::open_in_memory().unwrap();
		store.upsert_tileset(&sample_tileset("ts1")).unwrap();
		let body = b"same-bytes";
		let hash_a = store.upsert_tile("ts1", "0", body, None).unwrap();
		let hash_b = store.upsert_tile("ts1", "1", body, None).unwrap();
		assert_eq!(hash_a, hash_b);

		let conn = store.conn().unwrap();
		let count: i64 = conn.query_row("SELECT COUNT(*) FROM tile_data WHERE tileset_id = 'ts1'", [], |r| r.get(0)).unwrap();
		assert_eq!(count, 1);
	}

	#[test]
	fn get_tile_returns_stored_body() {
		let store = Store::open_in_memory().unwrap();
		store.upsert_tileset(&sample_tileset("ts1")).unwrap();
		store.upsert_tile("ts1", "03", b"hello", Some("W/\"abc\"")).unwrap();
		let (data, etag) = store.get_tile("ts1", "03").unwrap().unwrap();
		assert_eq!(data, b"hello");
		assert_eq!(etag.as_deref(), Some("W/\"abc\""));
	}

	#[test]
	fn delete_tileset_removes_tiles_and_tile_data() {
		let store = Store::open_in_memory().unwrap();
		store.upsert_tileset(&sample_tileset("ts1")).unwrap();
		store.upsert_tile("ts1", "03", b"hello", None).unwrap();
		store.delete_tileset("ts1").unwrap();

		assert!(store.get_tileset("ts1").unwrap().is_none());
		assert!(store.get_tile("ts1", "03").unwrap().is_none());
	}

	#[test]
	fn sweep_stale_imports_marks_active_rows_as_error() {
		let store = Store::open_in_memory().unwrap();
		store
			.insert_import(&Import {
				id: "imp1".to_string(),
				state: ImportState::Active,
				error: None,
				started: 0,
				last_updated: None,
				finished: None,
				imported_resources: 0,
				total_resources: 10,
				imported_bytes: None,
				total_bytes: None,
				area_id: "area1".to_string(),
				tileset_id: None,
				import_type: "mbtiles".to_string(),
			})
			.unwrap();

		store.sweep_stale_imports().unwrap();

		let fetched = store.get_import("imp1").unwrap().unwrap();
		assert_eq!(fetched.state, ImportState::Error);
		assert_eq!(fetched.error.as_deref(), Some("UNKNOWN"));
	}

	#[test]
	fn import_progress_updates_counters() {
		let store = Store::open_in_memory().unwrap();
		store
			.insert_import(&Import {
				id: "imp2".to_string(),
				state: ImportState::Active,
				error: None,
				started: 0,
				last_updated: None,
				finished: None,
				imported_resources: 0,
				total_resources: 100,
				imported_bytes: None,
				total_bytes: None,
				area_id: "area1".to_string(),
				tileset_id: None,
				import_type: "mbtiles".to_string(),
			})
			.unwrap();

		store.update_import_progress("imp2", 42, Some(1024)).unwrap();
		let fetched = store.get_import("imp2").unwrap().unwrap();
		assert_eq!(fetched.imported_resources, 42);
		assert_eq!(fetched.imported_bytes, Some(1024));

		store.finish_import("imp2", ImportState::Complete, None).unwrap();
		let fetched = store.get_import("imp2").unwrap().unwrap();
		assert_eq!(fetched.state, ImportState::Complete);
		assert!(fetched.finished.is_some());
	}

	fn sample_style(id: &str, mapping: Value, sprite_id: Option<&str>) -> Style {
		Style {
			id: id.to_string(),
			stylejson: json!({"version": 8, "sources": {}, "layers": []}),
			source_id_to_tileset_id: mapping,
			sprite_id: sprite_id.map(str::to_owned),
			etag: None,
			upstream_url: None,
		}
	}

	#[test]
	fn delete_style_removes_uniquely_owned_tileset_and_sprite() {
		let store = Store::open_in_memory().unwrap();
		store.upsert_tileset(&sample_tileset("only-mine")).unwrap();
		store.upsert_tile("only-mine", "0", b"tile", None).unwrap();
		store
			.upsert_sprite(&Sprite {
				id: "sprite1".to_string(),
				pixel_density: 1,
				data: vec![1, 2, 3],
				layout: json!({}),
				etag: None,
				upstream_url: None,
			})
			.unwrap();
		store.upsert_style(&sample_style("s1", json!({"a": "only-mine"}), Some("sprite1"))).unwrap();

		store.delete_style("s1").unwrap();

		assert!(store.get_style("s1").unwrap().is_none());
		assert!(store.get_tileset("only-mine").unwrap().is_none());
		assert!(store.get_tile("only-mine", "0").unwrap().is_none());
		assert!(store.get_sprite("sprite1", 1).unwrap().is_none());
	}

	/// Regression test: a tileset id that is a *substring* of another
	/// tileset's id must not be mistaken for a shared reference, and a
	/// tileset genuinely referenced by a surviving style must not be
	/// deleted.
	#[test]
	fn delete_style_keeps_tileset_still_referenced_by_another_style() {
		let store = Store::open_in_memory().unwrap();
		store.upsert_tileset(&sample_tileset("ts1")).unwrap();
		store.upsert_tileset(&sample_tileset("ts11")).unwrap();
		store.upsert_style(&sample_style("s1", json!({"a": "ts1"}), None)).unwrap();
		store.upsert_style(&sample_style("s2", json!({"a": "ts11"}), None)).unwrap();

		store.delete_style("s1").unwrap();

		assert!(store.get_tileset("ts1").unwrap().is_none());
		assert!(store.get_tileset("ts11").unwrap().is_some());
	}

	#[test]
	fn delete_style_keeps_tileset_shared_by_two_styles() {
		let store = Store::open_in_memory().unwrap();
		store.upsert_tileset(&sample_tileset("shared")).unwrap();
		store.upsert_style(&sample_style("s1", json!({"a": "shared"}), None)).unwrap();
		store.upsert_style(&sample_style("s2", json!({"b": "shared"}), None)).unwrap();

		store.delete_style("s1").unwrap();

		assert!(store.get_style("s1").unwrap().is_none());
		assert!(store.get_tileset("shared").unwrap().is_some());
	}
}
