//! CORS origin policy.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CorsConfig {
	/// `"*"`, an exact origin, a `*.`/`.*` glob, or a `/regex/`.
	#[serde(default = "default_allowed_origins")]
	pub allowed_origins: Vec<String>,

	#[serde(default)]
	pub max_age_seconds: Option<u64>,
}

fn default_allowed_origins() -> Vec<String> {
	vec!["*".to_string()]
}

impl Default for CorsConfig {
	fn default() -> CorsConfig {
		CorsConfig { allowed_origins: default_allowed_origins(), max_age_seconds: None }
	}
}
