//! Deterministic, filesystem-safe identifiers.
//!
//! Ids are SHA-1 digests re-encoded as lower-case Crockford base32. SHA-1 is
//! not used for anything security-sensitive here — only for its speed and
//! short, collision-resistant output.

use data_encoding::{Encoding, Specification};
use rand::RngCore;
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::sync::LazyLock;

static CROCKFORD_LOWER: LazyLock<Encoding> = LazyLock::new(|| {
	let mut spec = Specification::new();
	spec.symbols.push_str("0123456789abcdefghjkmnpqrstvwxyz");
	spec.encoding().expect("valid crockford base32 spec")
});

/// SHA-1 digest of `bytes`.
pub fn hash(bytes: &[u8]) -> [u8; 20] {
	let mut hasher = Sha1::new();
	hasher.update(bytes);
	hasher.finalize().into()
}

/// Lower-case Crockford base32 of `bytes`.
pub fn encode_base32(bytes: &[u8]) -> String {
	CROCKFORD_LOWER.encode(bytes)
}

/// Hex-encode `bytes` (used for `TileData.tileHash`).
pub fn encode_hex(bytes: &[u8]) -> String {
	bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A fresh random id: 16 random bytes, Crockford-encoded.
pub fn generate_id() -> String {
	let mut buf = [0u8; 16];
	rand::thread_rng().fill_bytes(&mut buf);
	encode_base32(&buf)
}

/// Derive a `Tileset.id` from a TileJSON document: `base32(sha1(tilejson.id
/// ?? first(sorted(tilejson.tiles))))`.
pub fn tileset_id(tilejson: &Value) -> anyhow::Result<String> {
	if let Some(id) = tilejson.get("id").and_then(Value::as_str) {
		return Ok(encode_base32(&hash(id.as_bytes())));
	}

	let mut tiles: Vec<&str> = tilejson
		.get("tiles")
		.and_then(Value::as_array)
		.into_iter()
		.flatten()
		.filter_map(Value::as_str)
		.collect();
	tiles.sort_unstable();

	let seed = tiles
		.first()
		.ok_or_else(|| anyhow::anyhow!("tilejson has neither 'id' nor any 'tiles' entries"))?;
	Ok(encode_base32(&hash(seed.as_bytes())))
}

/// Derive a `Style.id` from the upstream URL it was fetched from: strip the
/// `access_token` query parameter (so two clients with different tokens
/// collapse onto the same record), re-serialise, then hash.
pub fn style_id_from_url(url: &str) -> anyhow::Result<String> {
	let mut parsed = url::Url::parse(url)?;
	let remaining: Vec<(String, String)> = parsed
		.query_pairs()
		.filter(|(k, _)| k != "access_token")
		.map(|(k, v)| (k.into_owned(), v.into_owned()))
		.collect();

	if remaining.is_empty() {
		parsed.set_query(None);
	} else {
		parsed
			.query_pairs_mut()
			.clear()
			.extend_pairs(remaining.iter().map(|(k, v)| (k.as_str(), v.as_str())));
	}

	Ok(encode_base32(&hash(parsed.as_str().as_bytes())))
}

/// Derive an `OfflineArea.id` for a given tileset: `base32(sha1("area:"+tilesetId))`.
pub fn area_id(tileset_id: &str) -> String {
	encode_base32(&hash(format!("area:{tileset_id}").as_bytes()))
}

/// Derive the deterministic `Style.id` used by `StylesService::createForTileset`.
pub fn style_id_from_tileset(tileset_id: &str) -> String {
	encode_base32(&hash(format!("style:{tileset_id}").as_bytes()))
}
