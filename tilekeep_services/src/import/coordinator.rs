//! Import lifecycle: validates and kicks off an MBTiles import, registers
//! progress fan-out, and enforces the inactivity timeout.

use super::mbtiles;
use super::worker::ImportWorker;
use super::ImportMessage;
use crate::styles::StylesService;
use crate::tilesets::TilesetsService;
use dashmap::DashMap;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tilekeep_core::error::{AppError, AppResult};
use tilekeep_core::json as tj;
use tilekeep_core::id;
use tilekeep_store::Store;
use tokio::sync::broadcast;

const INITIAL_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(10);
const SUBSEQUENT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(5);

struct ActiveImport {
	cancel: Arc<AtomicBool>,
	progress_tx: broadcast::Sender<ImportMessage>,
}

pub struct ImportOutcome {
	pub import_id: String,
	pub tileset_id: String,
	pub style_id: String,
}

pub struct ImportCoordinator {
	store: Arc<Store>,
	tilesets: Arc<TilesetsService>,
	styles: Arc<StylesService>,
	active: DashMap<String, ActiveImport>,
}

impl ImportCoordinator {
	pub fn new(store: Arc<Store>, tilesets: Arc<TilesetsService>, styles: Arc<StylesService>) -> Arc<ImportCoordinator> {
		Arc::new(ImportCoordinator { store, tilesets, styles, active: DashMap::new() })
	}

	/// Subscribe to an in-flight import's progress stream. Returns `None` if
	/// the import is not currently active (it may already be finished).
	pub fn subscribe(&self, import_id: &str) -> Option<broadcast::Receiver<ImportMessage>> {
		self.active.get(import_id).map(|entry| entry.progress_tx.subscribe())
	}

	pub fn is_active(&self, import_id: &str) -> bool {
		self.active.contains_key(import_id)
	}

	pub fn get_import(&self, import_id: &str) -> AppResult<Option<tilekeep_store::models::Import>> {
		self.store.get_import(import_id).map_err(AppError::Internal)
	}

	/// Validate the source file, create the tileset+style rows up front, then
	/// hand the actual byte-streaming off to a blocking worker thread.
	pub async fn import_mbtiles(self: &Arc<Self>, source_path: PathBuf, base_url: &str, name: Option<String>) -> AppResult<ImportOutcome> {
		if !source_path.is_file() {
			return Err(AppError::MbtilesImportTargetMissing(source_path.display().to_string()));
		}

		let path_for_blocking = source_path.clone();
		let tilejson = tokio::task::spawn_blocking(move || mbtiles::extract_tilejson(&path_for_blocking))
			.await
			.map_err(|e| AppError::Internal(e.into()))?
			.map_err(|e| AppError::MbtilesCannotRead(e.to_string()))?;

		let format = tilejson.get("format").and_then(Value::as_str).unwrap_or_default();
		if !matches!(format, "jpg" | "png" | "webp") {
			return Err(AppError::UnsupportedMbtilesFormat(format.to_string()));
		}
		tj::validate_tilejson(&tilejson).map_err(|e| AppError::MbtilesInvalidMetadata(e.to_string()))?;

		let has_vector_layers = tilejson.get("vector_layers").and_then(Value::as_array).is_some_and(|a| !a.is_empty());

		let created = self.tilesets.create(tilejson, base_url, None, None)?;
		let tileset_id = created["id"].as_str().expect("tileset create always returns an id").to_string();

		let style_id = match self.styles.create_for_tileset(&tileset_id, format, has_vector_layers, name) {
			Ok(id) => id,
			Err(err) => {
				let _ = self.store.delete_tileset(&tileset_id);
				return Err(err);
			}
		};

		let import_id = id::generate_id();
		let area_id = id::area_id(&tileset_id);
		let cancel = Arc::new(AtomicBool::new(false));
		let (progress_tx, _) = broadcast::channel(64);

		self.active.insert(import_id.clone(), ActiveImport { cancel: Arc::clone(&cancel), progress_tx: progress_tx.clone() });

		// Subscribed before the worker/monitor are spawned so the first
		// message can never be missed to a race.
		let mut first_rx = progress_tx.subscribe();

		let worker = ImportWorker::new(
			Arc::clone(&self.store),
			source_path,
			import_id.clone(),
			tileset_id.clone(),
			style_id.clone(),
			area_id,
			progress_tx.clone(),
			Arc::clone(&cancel),
		);
		let worker_handle = tokio::task::spawn_blocking(move || worker.run());

		let this = Arc::clone(self);
		let monitor_import_id = import_id.clone();
		let monitor_style_id = style_id.clone();
		let monitor_tileset_id = tileset_id.clone();
		tokio::spawn(async move {
			this.monitor(monitor_import_id, monitor_style_id, monitor_tileset_id, progress_tx, cancel).await;
			let _ = worker_handle.await;
		});

		// The outer call resolves only once the worker has made itself heard:
		// its first progress message, an immediate completion, or a rejection.
		// Silence for the whole inactivity window is itself a failure.
		match tokio::time::timeout(INITIAL_INACTIVITY_TIMEOUT, first_rx.recv()).await {
			Ok(Ok(ImportMessage::Progress { .. } | ImportMessage::Complete { .. })) => Ok(ImportOutcome { import_id, tileset_id, style_id }),
			Ok(Ok(ImportMessage::Error { message })) => Err(AppError::Internal(anyhow::anyhow!(message))),
			Ok(Err(_)) | Err(_) => Err(AppError::Timeout),
		}
	}

	/// Watches an import's progress broadcast and cancels it if no progress
	/// arrives within the inactivity window: 10s before the first message,
	/// 5s between subsequent ones. Removes the import from the active
	/// registry once a terminal message is observed or the channel closes.
	async fn monitor(
		self: Arc<Self>,
		import_id: String,
		style_id: String,
		tileset_id: String,
		progress_tx: broadcast::Sender<ImportMessage>,
		cancel: Arc<AtomicBool>,
	) {
		let mut rx = progress_tx.subscribe();
		let mut timeout = INITIAL_INACTIVITY_TIMEOUT;

		loop {
			match tokio::time::timeout(timeout, rx.recv()).await {
				Ok(Ok(ImportMessage::Progress { .. })) => {
					timeout = SUBSEQUENT_INACTIVITY_TIMEOUT;
				}
				Ok(Ok(ImportMessage::Complete { .. })) | Ok(Ok(ImportMessage::Error { .. })) => break,
				Ok(Err(_)) => break,
				Err(_elapsed) => {
					log::warn!("import '{import_id}' timed out waiting for progress, cancelling");
					cancel.store(true, Ordering::Relaxed);
					let _ = self.store.finish_import(&import_id, tilekeep_store::models::ImportState::Error, Some("TIMEOUT"));
					break;
				}
			}
		}

		self.active.remove(&import_id);

		if let Ok(Some(import)) = self.store.get_import(&import_id) {
			if import.state == tilekeep_store::models::ImportState::Error {
				log::warn!("import '{import_id}' failed, removing orphaned style '{style_id}' and tileset '{tileset_id}'");
				let _ = self.styles.delete(&style_id);
			}
		}
	}
}
