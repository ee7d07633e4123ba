//! HTTP server bind address and port.

use serde::Deserialize;

#[derive(Debug, Default, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
	/// Defaults to `"0.0.0.0"`.
	pub ip: Option<String>,
	/// Defaults to `8080`.
	pub port: Option<u16>,
}

impl ServerConfig {
	pub fn ip_or_default(&self) -> &str {
		self.ip.as_deref().unwrap_or("0.0.0.0")
	}

	pub fn port_or_default(&self) -> u16 {
		self.port.unwrap_or(8080)
	}
}
