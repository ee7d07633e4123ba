//! CORS origin policy construction.
//!
//! Supports the following `allowed_origins` patterns:
//! - `"*"`                     → allow all origins
//! - `"*example.com"`          → suffix match
//! - `"example.com*"`          → prefix match
//! - `"/regex/"`                → custom regex (leading and trailing `/`)
//! - exact strings like `"https://maps.example.org"`

use crate::config::CorsConfig;
use anyhow::Result;
use axum::http::{header::HeaderValue, request::Parts};
use regex::Regex;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};

type Predicate = Box<dyn Fn(&str) -> bool + Send + Sync + 'static>;

pub fn build_cors_layer(config: &CorsConfig) -> Result<CorsLayer> {
	let checks: Vec<Predicate> = config
		.allowed_origins
		.iter()
		.map(|pattern| {
			Ok::<Predicate, anyhow::Error>(if pattern == "*" {
				Box::new(|_: &str| true)
			} else if Regex::new(r"^\*[^*]+$")?.is_match(pattern) {
				let suffix = pattern[1..].to_string();
				Box::new(move |origin: &str| origin.ends_with(&suffix))
			} else if Regex::new(r"^[^*]+\*$")?.is_match(pattern) {
				let prefix = pattern[..pattern.len() - 1].to_string();
				Box::new(move |origin: &str| origin.starts_with(&prefix))
			} else if Regex::new(r"^/.+/$")?.is_match(pattern) {
				let re = Regex::new(&pattern[1..pattern.len() - 1])?;
				Box::new(move |origin: &str| re.is_match(origin))
			} else {
				let exact = pattern.clone();
				Box::new(move |origin: &str| origin == exact)
			})
		})
		.collect::<Result<Vec<_>>>()?;

	let layer = CorsLayer::new()
		.allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _parts: &Parts| {
			let origin_str = origin.to_str().unwrap_or("");
			checks.iter().any(|check| check(origin_str))
		}))
		.max_age(Duration::from_secs(config.max_age_seconds.unwrap_or(3600)));

	Ok(layer)
}
