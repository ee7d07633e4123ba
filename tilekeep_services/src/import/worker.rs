//! Off-thread MBTiles→Store streaming with throttled progress.
//! Runs on a `tokio::task::spawn_blocking` thread, never on the async
//! runtime, since every step here is blocking SQLite I/O.

use super::mbtiles;
use super::{ImportMessage, time_now_millis};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tilekeep_core::tile_address::{self, TileCoord};
use tilekeep_store::Store;
use tilekeep_store::models::{Import, ImportState, OfflineArea};
use tokio::sync::broadcast;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

pub struct ImportWorker {
	store: Arc<Store>,
	source_path: PathBuf,
	import_id: String,
	tileset_id: String,
	style_id: String,
	area_id: String,
	progress_tx: broadcast::Sender<ImportMessage>,
	cancel: Arc<AtomicBool>,
}

impl ImportWorker {
	pub fn new(
		store: Arc<Store>,
		source_path: PathBuf,
		import_id: String,
		tileset_id: String,
		style_id: String,
		area_id: String,
		progress_tx: broadcast::Sender<ImportMessage>,
		cancel: Arc<AtomicBool>,
	) -> ImportWorker {
		ImportWorker { store, source_path, import_id, tileset_id, style_id, area_id, progress_tx, cancel }
	}

	/// Blocking entry point, invoked from `spawn_blocking`.
	pub fn run(self) {
		if let Err(err) = self.run_inner() {
			log::error!("mbtiles import '{}' failed: {err}", self.import_id);
			if self.cancel.load(Ordering::Relaxed) {
				// The coordinator's monitor already persisted
				// `state='error', error='TIMEOUT'`; don't clobber it.
				let _ = self.progress_tx.send(ImportMessage::Error { message: "TIMEOUT".to_string() });
			} else {
				let _ = self.store.finish_import(&self.import_id, ImportState::Error, Some(&err.to_string()));
				let _ = self.progress_tx.send(ImportMessage::Error { message: err.to_string() });
			}
		}
	}

	fn run_inner(&self) -> anyhow::Result<()> {
		let source = mbtiles::open_read_only(&self.source_path)?;
		let (total_tiles, total_bytes) = mbtiles::total_tiles_and_bytes(&source)?;
		let tilejson = mbtiles::extract_tilejson_from_conn(&source, &self.source_path)?;

		self.store.upsert_offline_area(&OfflineArea {
			id: self.area_id.clone(),
			zoom_level: tilejson.get("maxzoom").and_then(Value::as_i64),
			bounding_box: tilejson.get("bounds").map(|b| b.to_string()),
			name: tilejson.get("name").and_then(Value::as_str).map(str::to_owned),
			style_id: self.style_id.clone(),
		})?;

		self.store.insert_import(&Import {
			id: self.import_id.clone(),
			state: ImportState::Active,
			error: None,
			started: time_now_millis(),
			last_updated: None,
			finished: None,
			imported_resources: 0,
			total_resources: total_tiles,
			imported_bytes: Some(0),
			total_bytes: Some(total_bytes),
			area_id: self.area_id.clone(),
			tileset_id: Some(self.tileset_id.clone()),
			import_type: "tileset".to_string(),
		})?;

		let mut stmt = source.prepare("SELECT zoom_level, tile_column, tile_row, tile_data FROM tiles")?;
		let mut rows = stmt.query([])?;

		let mut imported_resources = 0i64;
		let mut imported_bytes = 0i64;
		let mut last_report = Instant::now();

		while let Some(row) = rows.next()? {
			if self.cancel.load(Ordering::Relaxed) {
				anyhow::bail!("import cancelled due to inactivity timeout");
			}

			let z: Option<i64> = row.get(0)?;
			let x: Option<i64> = row.get(1)?;
			let y: Option<i64> = row.get(2)?;
			let data: Option<Vec<u8>> = row.get(3)?;

			let (Some(z), Some(x), Some(y), Some(data)) = (z, x, y, data) else {
				anyhow::bail!("mbtiles row at offset {imported_resources} contains a null field");
			};

			// MBTiles rows use TMS row order; flip to XYZ before addressing.
			let coord = TileCoord::new(z as u8, x as u32, y as u32).flip_y();
			let quad_key = tile_address::quad_key(coord);

			imported_resources += 1;
			imported_bytes += data.len() as i64;
			self.store.upsert_tile_and_advance_import(
				&self.tileset_id,
				&quad_key,
				&data,
				None,
				&self.import_id,
				imported_resources,
				Some(imported_bytes),
			)?;

			let is_last = imported_resources == total_tiles;
			if is_last || last_report.elapsed() >= PROGRESS_INTERVAL {
				let _ = self.progress_tx.send(ImportMessage::Progress { so_far: imported_resources, total: total_tiles });
				last_report = Instant::now();
			}
		}

		self.store.finish_import(&self.import_id, ImportState::Complete, None)?;
		let _ = self.progress_tx.send(ImportMessage::Complete { total: total_tiles });
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use r2d2_sqlite::rusqlite::Connection;
	use tempfile::NamedTempFile;

	fn fixture_mbtiles(tile_count: usize) -> NamedTempFile {
		let file = NamedTempFile::new().unwrap();
		let conn = Connection::open(file.path()).unwrap();
		conn.execute_batch(
			"CREATE TABLE metadata (name TEXT, value TEXT);
			 CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB);
			 INSERT INTO metadata VALUES ('format', 'png');
			 INSERT INTO metadata VALUES ('maxzoom', '1');",
		)
		.unwrap();
		for i in 0..tile_count {
			conn.execute(
				"INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (1, ?1, ?1, ?2)",
				(i as i64, vec![0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, i as u8]),
			)
			.unwrap();
		}
		file
	}

	#[test]
	fn imports_all_rows_and_reports_completion() {
		let file = fixture_mbtiles(4);
		let store = Arc::new(Store::open_in_memory().unwrap());
		let (tx, mut rx) = broadcast::channel(32);

		let worker = ImportWorker::new(
			Arc::clone(&store),
			file.path().to_path_buf(),
			"imp1".to_string(),
			"ts1".to_string(),
			"style1".to_string(),
			"area1".to_string(),
			tx,
			Arc::new(AtomicBool::new(false)),
		);
		worker.run();

		let import = store.get_import("imp1").unwrap().unwrap();
		assert_eq!(import.state, ImportState::Complete);
		assert_eq!(import.imported_resources, 4);
		assert_eq!(import.total_resources, 4);

		let mut saw_complete = false;
		while let Ok(msg) = rx.try_recv() {
			if matches!(msg, ImportMessage::Complete { total: 4 }) {
				saw_complete = true;
			}
		}
		assert!(saw_complete);
	}

	#[test]
	fn cancellation_flag_aborts_without_clobbering_monitors_timeout_write() {
		let file = fixture_mbtiles(4);
		let store = Arc::new(Store::open_in_memory().unwrap());
		let (tx, mut rx) = broadcast::channel(32);
		let cancel = Arc::new(AtomicBool::new(true));

		let worker = ImportWorker::new(
			Arc::clone(&store),
			file.path().to_path_buf(),
			"imp2".to_string(),
			"ts1".to_string(),
			"style1".to_string(),
			"area1".to_string(),
			tx,
			cancel,
		);
		worker.run();

		// The coordinator's monitor, not the worker, owns the TIMEOUT write;
		// a cancelled worker must leave whatever the monitor already wrote alone.
		let import = store.get_import("imp2").unwrap().unwrap();
		assert_eq!(import.state, ImportState::Active);

		let mut saw_timeout = false;
		while let Ok(msg) = rx.try_recv() {
			if matches!(msg, ImportMessage::Error { ref message } if message == "TIMEOUT") {
				saw_timeout = true;
			}
		}
		assert!(saw_timeout);
	}
}
