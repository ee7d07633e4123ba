//! TileJSON and Style (v8) document validation.
//!
//! Documents are kept as [`serde_json::Value`] throughout the stack rather
//! than strongly-typed structs: the store persists them verbatim (TEXT
//! columns queried with SQLite's `json_extract`), and most fields are passed
//! through to clients unmodified. Validation only checks the handful of
//! invariants the rest of the stack actually relies on.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileFormat {
	Pbf,
	Png,
	Jpg,
	Webp,
}

impl TileFormat {
	pub fn parse(s: &str) -> Option<TileFormat> {
		match s {
			"pbf" => Some(TileFormat::Pbf),
			"png" => Some(TileFormat::Png),
			"jpg" | "jpeg" => Some(TileFormat::Jpg),
			"webp" => Some(TileFormat::Webp),
			_ => None,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			TileFormat::Pbf => "pbf",
			TileFormat::Png => "png",
			TileFormat::Jpg => "jpg",
			TileFormat::Webp => "webp",
		}
	}
}

/// Validate a TileJSON document: requires `tilejson`, `tiles`, a recognised
/// `format`, and `vector_layers` when `format='pbf'`.
pub fn validate_tilejson(doc: &Value) -> anyhow::Result<TileFormat> {
	anyhow::ensure!(doc.is_object(), "tilejson must be a JSON object");
	anyhow::ensure!(doc.get("tilejson").and_then(Value::as_str).is_some(), "tilejson: missing 'tilejson' version field");

	let tiles = doc
		.get("tiles")
		.and_then(Value::as_array)
		.filter(|t| !t.is_empty())
		.ok_or_else(|| anyhow::anyhow!("tilejson: missing or empty 'tiles' array"))?;
	anyhow::ensure!(tiles.iter().all(Value::is_string), "tilejson: 'tiles' must be an array of strings");

	let format_str = doc
		.get("format")
		.and_then(Value::as_str)
		.ok_or_else(|| anyhow::anyhow!("tilejson: missing 'format'"))?;
	let format = TileFormat::parse(format_str).ok_or_else(|| anyhow::anyhow!("tilejson: unsupported format '{format_str}'"))?;

	if format == TileFormat::Pbf {
		anyhow::ensure!(
			doc.get("vector_layers").and_then(Value::as_array).is_some(),
			"tilejson: format='pbf' requires 'vector_layers'"
		);
	}

	Ok(format)
}

/// Validate a style (v8) document per spec glossary: `version=8`, `sources`
/// and `layers` present.
pub fn validate_style(doc: &Value) -> anyhow::Result<()> {
	anyhow::ensure!(doc.is_object(), "style must be a JSON object");
	anyhow::ensure!(doc.get("version").and_then(Value::as_i64) == Some(8), "style: 'version' must be 8");
	anyhow::ensure!(doc.get("sources").is_some_and(Value::is_object), "style: missing 'sources' object");
	anyhow::ensure!(doc.get("layers").is_some_and(Value::is_array), "style: missing 'layers' array");
	Ok(())
}

/// Iterate `style.sources` as `(source_id, source_value)` pairs.
pub fn style_sources(doc: &Value) -> Vec<(String, Value)> {
	doc.get("sources")
		.and_then(Value::as_object)
		.into_iter()
		.flat_map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())))
		.collect()
}

/// `true` if `url` points at a Mapbox-hosted resource (`mapbox://...` or a
/// `*.mapbox.com`/`*.tiles.mapbox.com` host). A thin stand-in for the
/// out-of-scope Mapbox URL normalisation helper: just enough
/// detection for the ingestion pipeline to know when an access token is
/// mandatory.
pub fn is_mapbox_url(url: &str) -> bool {
	if url.starts_with("mapbox://") {
		return true;
	}
	url::Url::parse(url)
		.ok()
		.and_then(|u| u.host_str().map(str::to_owned))
		.is_some_and(|host| host == "mapbox.com" || host.ends_with(".mapbox.com"))
}

/// Inject `access_token` as a query parameter, the minimal normalisation the
/// offline-source materialiser needs before fetching a Mapbox-hosted source.
pub fn with_access_token(url: &str, access_token: &str) -> anyhow::Result<String> {
	let mut parsed = url::Url::parse(url)?;
	parsed.query_pairs_mut().append_pair("access_token", access_token);
	Ok(parsed.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn valid_raster_tilejson_passes() {
		let doc = json!({"tilejson": "2.2.0", "tiles": ["http://x/{z}/{x}/{y}"], "format": "png"});
		assert_eq!(validate_tilejson(&doc).unwrap(), TileFormat::Png);
	}

	#[test]
	fn pbf_without_vector_layers_fails() {
		let doc = json!({"tilejson": "2.2.0", "tiles": ["http://x/{z}/{x}/{y}"], "format": "pbf"});
		assert!(validate_tilejson(&doc).is_err());
	}

	#[test]
	fn pbf_with_vector_layers_passes() {
		let doc = json!({
			"tilejson": "2.2.0",
			"tiles": ["http://x/{z}/{x}/{y}"],
			"format": "pbf",
			"vector_layers": [{"id": "layer"}],
		});
		assert_eq!(validate_tilejson(&doc).unwrap(), TileFormat::Pbf);
	}

	#[test]
	fn missing_tiles_fails() {
		let doc = json!({"tilejson": "2.2.0", "format": "png"});
		assert!(validate_tilejson(&doc).is_err());
	}

	#[test]
	fn valid_style_passes() {
		let doc = json!({"version": 8, "sources": {}, "layers": []});
		validate_style(&doc).unwrap();
	}

	#[test]
	fn wrong_version_fails() {
		let doc = json!({"version": 7, "sources": {}, "layers": []});
		assert!(validate_style(&doc).is_err());
	}

	#[test]
	fn detects_mapbox_urls() {
		assert!(is_mapbox_url("mapbox://styles/mapbox/streets-v11"));
		assert!(is_mapbox_url("http://a.tiles.mapbox.com/v3/foo"));
		assert!(!is_mapbox_url("http://example.org/tiles.json"));
	}

	#[test]
	fn with_access_token_appends_query_param() {
		let url = with_access_token("https://api.mapbox.com/v4/foo.json", "tok123").unwrap();
		assert_eq!(url, "https://api.mapbox.com/v4/foo.json?access_token=tok123");
	}
}
