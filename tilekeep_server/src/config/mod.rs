//! YAML configuration for the `serve` subcommand.

mod cors;
mod server;
mod upstream;

pub use cors::CorsConfig;
pub use server::ServerConfig;
pub use upstream::UpstreamConfig;

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration document, parsed from a single YAML file.
///
/// # Example YAML
/// ```yaml
/// server:
///   ip: 0.0.0.0
///   port: 8080
/// database_path: ./tilekeep.sqlite
/// static_glyphs_dir: ./sdf
/// cors:
///   allowed_origins: ["*"]
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
	#[serde(default)]
	pub server: ServerConfig,

	#[serde(default)]
	pub cors: CorsConfig,

	#[serde(default)]
	pub upstream: UpstreamConfig,

	/// Path to the SQLite database file.
	#[serde(default = "default_database_path")]
	pub database_path: PathBuf,

	/// Directory holding the default static glyph `.pbf` files.
	#[serde(default = "default_static_glyphs_dir")]
	pub static_glyphs_dir: PathBuf,

	/// Default Mapbox access token, used when a request does not supply its own.
	#[serde(default)]
	pub default_access_token: Option<String>,
}

fn default_database_path() -> PathBuf {
	PathBuf::from("tilekeep.sqlite")
}

fn default_static_glyphs_dir() -> PathBuf {
	PathBuf::from("sdf")
}

impl Config {
	pub fn from_yaml_file(path: &Path) -> anyhow::Result<Config> {
		let text = std::fs::read_to_string(path)
			.map_err(|e| anyhow::anyhow!("failed to read config file {path:?}: {e}"))?;
		let config: Config = serde_yaml_ng::from_str(&text)
			.map_err(|e| anyhow::anyhow!("failed to parse config file {path:?}: {e}"))?;
		Ok(config)
	}
}

impl Default for Config {
	fn default() -> Config {
		Config {
			server: ServerConfig::default(),
			cors: CorsConfig::default(),
			upstream: UpstreamConfig::default(),
			database_path: default_database_path(),
			static_glyphs_dir: default_static_glyphs_dir(),
			default_access_token: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_minimal_yaml() {
		let yaml = "server:\n  port: 9000\n";
		let config: Config = serde_yaml_ng::from_str(yaml).unwrap();
		assert_eq!(config.server.port, Some(9000));
		assert_eq!(config.database_path, default_database_path());
	}

	#[test]
	fn rejects_unknown_top_level_field() {
		let yaml = "bogus: true\n";
		assert!(serde_yaml_ng::from_str::<Config>(yaml).is_err());
	}
}
