use crate::config::Config;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tilekeep_services::{ImportCoordinator, ImportMessage, StylesService, TilesetsService, UpstreamManager};
use tilekeep_store::Store;

#[derive(clap::Args, Debug)]
pub struct Subcommand {
	/// Path to the MBTiles file to import.
	pub mbtiles_path: PathBuf,

	/// Path to a YAML configuration file, used for the database location.
	#[arg(short = 'c', long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Name for the generated style; defaults to a name derived from the tileset id.
	#[arg(long)]
	pub name: Option<String>,

	/// Base URL used when rewriting the generated tileset/style documents.
	#[arg(long, default_value = "http://localhost:8080")]
	pub base_url: String,
}

#[tokio::main]
pub async fn run(arguments: &Subcommand) -> Result<()> {
	let config = match &arguments.config {
		Some(path) => Config::from_yaml_file(path).with_context(|| format!("loading config from {path:?}"))?,
		None => Config::default(),
	};

	let store = Arc::new(Store::open(&config.database_path).with_context(|| format!("opening database at {:?}", config.database_path))?);
	let upstream = UpstreamManager::new(&config.upstream.user_agent, std::time::Duration::from_secs(config.upstream.timeout_secs))?;
	let tilesets = TilesetsService::new(Arc::clone(&store), Arc::clone(&upstream));
	let styles = StylesService::new(Arc::clone(&store), upstream, Arc::clone(&tilesets));
	let imports = ImportCoordinator::new(store, tilesets, styles);

	let outcome = imports.import_mbtiles(arguments.mbtiles_path.clone(), &arguments.base_url, arguments.name.clone()).await?;
	log::info!("started import '{}' for tileset '{}'", outcome.import_id, outcome.tileset_id);

	let Some(mut rx) = imports.subscribe(&outcome.import_id) else {
		log::info!("import already finished");
		return Ok(());
	};

	loop {
		match rx.recv().await {
			Ok(ImportMessage::Progress { so_far, total }) => println!("imported {so_far}/{total} tiles"),
			Ok(ImportMessage::Complete { total }) => {
				println!("import complete: {total} tiles");
				break;
			}
			Ok(ImportMessage::Error { message }) => {
				anyhow::bail!("import failed: {message}");
			}
			Err(_) => break,
		}
	}

	Ok(())
}
