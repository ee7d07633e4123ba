use crate::config::Config;
use crate::server::TileServer;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tilekeep_store::Store;

#[derive(clap::Args, Debug)]
pub struct Subcommand {
	/// Path to a YAML configuration file.
	#[arg(short = 'c', long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Serve via socket ip, overriding the config file.
	#[arg(short = 'i', long)]
	pub ip: Option<String>,

	/// Serve via port, overriding the config file.
	#[arg(short, long)]
	pub port: Option<u16>,
}

#[tokio::main]
pub async fn run(arguments: &Subcommand) -> Result<()> {
	let mut config = match &arguments.config {
		Some(path) => Config::from_yaml_file(path).with_context(|| format!("loading config from {path:?}"))?,
		None => Config::default(),
	};

	if let Some(ip) = &arguments.ip {
		config.server.ip = Some(ip.clone());
	}
	if let Some(port) = arguments.port {
		config.server.port = Some(port);
	}

	let store = Arc::new(Store::open(&config.database_path).with_context(|| format!("opening database at {:?}", config.database_path))?);

	let mut server = TileServer::new(&config, store)?;
	server.start().await?;

	log::info!("serving on {}:{}", config.server.ip_or_default(), server.get_port());

	tokio::signal::ctrl_c().await.ok();
	server.stop().await;

	Ok(())
}
