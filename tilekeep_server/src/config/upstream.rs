//! Upstream HTTP client tuning for `UpstreamManager`.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
	#[serde(default = "default_user_agent")]
	pub user_agent: String,

	#[serde(default = "default_timeout_secs")]
	pub timeout_secs: u64,
}

fn default_user_agent() -> String {
	format!("tilekeep/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout_secs() -> u64 {
	15
}

impl Default for UpstreamConfig {
	fn default() -> UpstreamConfig {
		UpstreamConfig { user_agent: default_user_agent(), timeout_secs: default_timeout_secs() }
	}
}
