//! HTTP handlers for the tilekeep API surface.

use super::error::ApiError;
use super::state::{AppState, base_url};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::convert::Infallible;
use std::path::PathBuf;
use tilekeep_core::error::AppError;
use tilekeep_services::ImportMessage;
use tilekeep_store::models::ImportState;
use tokio::sync::broadcast;

pub async fn status() -> &'static str {
	"ready!"
}

// --- tilesets ----------------------------------------------------------------

pub async fn list_tilesets(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Vec<Value>>, ApiError> {
	let base = base_url(&headers);
	Ok(Json(state.tilesets.list(&base)?))
}

pub async fn create_tileset(State(state): State<AppState>, headers: HeaderMap, Json(tilejson): Json<Value>) -> Result<Json<Value>, ApiError> {
	let base = base_url(&headers);
	let created = state.tilesets.create(tilejson, &base, None, None)?;

	let tileset_id = created["id"].as_str().unwrap_or_default().to_string();
	let format = created["format"].as_str().unwrap_or_default().to_string();
	let has_vector_layers = created.get("vector_layers").and_then(Value::as_array).is_some_and(|a| !a.is_empty());

	if let Err(err) = state.styles.create_for_tileset(&tileset_id, &format, has_vector_layers, None) {
		log::warn!("failed to create default style for tileset '{tileset_id}': {err}");
	}

	Ok(Json(created))
}

pub async fn get_tileset(State(state): State<AppState>, Path(id): Path<String>, headers: HeaderMap) -> Result<Json<Value>, ApiError> {
	let base = base_url(&headers);
	Ok(Json(state.tilesets.get(&id, &base)?))
}

pub async fn put_tileset(
	State(state): State<AppState>,
	Path(id): Path<String>,
	headers: HeaderMap,
	Json(tilejson): Json<Value>,
) -> Result<Json<Value>, ApiError> {
	let base = base_url(&headers);
	Ok(Json(state.tilesets.put(&id, tilejson, &base, None)?))
}

pub async fn get_tile(
	State(state): State<AppState>,
	Path((id, z, x, y)): Path<(String, u8, u32, u32)>,
	Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
	let access_token = params.get("access_token").cloned().or_else(|| state.default_access_token.clone());
	let tile = state.tiles.get(&id, z, x, y, access_token.as_deref()).await?;

	let mut builder = Response::builder().status(StatusCode::OK).header(header::CONTENT_TYPE, tile.headers.content_type);
	if let Some(encoding) = tile.headers.content_encoding {
		builder = builder.header(header::CONTENT_ENCODING, encoding);
	}
	if let Some(etag) = &tile.etag {
		builder = builder.header(header::ETAG, etag.as_str());
	}

	Ok(builder.body(Body::from(tile.data)).expect("tile response should build"))
}

// --- import --------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
	pub file_path: String,
	pub name: Option<String>,
}

pub async fn import_mbtiles(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<ImportRequest>) -> Result<Json<Value>, ApiError> {
	let base = base_url(&headers);
	let outcome = state.imports.import_mbtiles(PathBuf::from(req.file_path), &base, req.name).await?;
	Ok(Json(json!({
		"import": {"id": outcome.import_id},
		"tileset": {"id": outcome.tileset_id},
		"style": {"id": outcome.style_id},
	})))
}

pub async fn import_progress(
	State(state): State<AppState>,
	Path(import_id): Path<String>,
	headers: HeaderMap,
) -> Result<Response, ApiError> {
	if let Some(last_event_id) = headers.get("last-event-id").and_then(|v| v.to_str().ok()) {
		if last_event_id == "complete" || last_event_id == "error" {
			return Ok(StatusCode::NO_CONTENT.into_response());
		}
	}

	let import = state.imports.get_import(&import_id)?.ok_or(AppError::NotFound)?;

	if import.state != ImportState::Active {
		let event_type = match import.state {
			ImportState::Complete => "complete",
			ImportState::Error => "error",
			ImportState::Active => unreachable!(),
		};
		let payload = json!({
			"type": event_type,
			"importId": import_id,
			"soFar": import.imported_resources,
			"total": import.total_resources,
		});
		let event = Event::default().id(event_type).data(payload.to_string());
		let single = stream::once(async move { Ok::<_, Infallible>(event) });
		return Ok(Sse::new(single).into_response());
	}

	let Some(rx) = state.imports.subscribe(&import_id) else {
		return Ok(StatusCode::NO_CONTENT.into_response());
	};

	let event_stream = stream::unfold((rx, import_id), |(mut rx, import_id)| async move {
		loop {
			match rx.recv().await {
				Ok(ImportMessage::Progress { so_far, total }) => {
					let payload = json!({"type": "progress", "importId": import_id, "soFar": so_far, "total": total});
					return Some((Ok::<_, Infallible>(Event::default().data(payload.to_string())), (rx, import_id)));
				}
				Ok(ImportMessage::Complete { total }) => {
					let payload = json!({"type": "complete", "importId": import_id, "soFar": total, "total": total});
					return Some((Ok(Event::default().id("complete").data(payload.to_string())), (rx, import_id)));
				}
				Ok(ImportMessage::Error { message }) => {
					let payload = json!({"type": "error", "importId": import_id, "message": message});
					return Some((Ok(Event::default().id("error").data(payload.to_string())), (rx, import_id)));
				}
				Err(broadcast::error::RecvError::Lagged(_)) => continue,
				Err(broadcast::error::RecvError::Closed) => return None,
			}
		}
	});

	Ok(Sse::new(event_stream).keep_alive(KeepAlive::default()).into_response())
}

// --- styles --------------------------------------------------------------------

pub async fn list_styles(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Vec<Value>>, ApiError> {
	let base = base_url(&headers);
	Ok(Json(state.styles.list(&base)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", untagged)]
pub enum CreateStyleRequest {
	Upstream { url: String, access_token: Option<String> },
	Inline { style: Value, id: Option<String>, access_token: Option<String> },
}

pub async fn create_style(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<CreateStyleRequest>) -> Result<Json<Value>, ApiError> {
	let base = base_url(&headers);

	let (style, opts) = match req {
		CreateStyleRequest::Inline { style, id, access_token } => {
			(style, tilekeep_services::CreateStyleOptions { access_token, id, ..Default::default() })
		}
		CreateStyleRequest::Upstream { url, access_token } => {
			let response = state
				.upstream
				.get_upstream(&url, tilekeep_services::ResponseType::Json, None)
				.await
				.map_err(|e| AppError::UnsupportedSource(e.to_string()))?;
			let style = response.body.into_json().map_err(|e| AppError::UpstreamJsonValidation(e.to_string()))?;
			let opts = tilekeep_services::CreateStyleOptions {
				access_token,
				upstream_url: Some(url),
				etag: response.etag,
				..Default::default()
			};
			(style, opts)
		}
	};

	Ok(Json(state.styles.create(style, &base, opts).await?))
}

pub async fn get_style(State(state): State<AppState>, Path(id): Path<String>, headers: HeaderMap) -> Result<Json<Value>, ApiError> {
	let base = base_url(&headers);
	Ok(Json(state.styles.get(&id, &base)?))
}

pub async fn delete_style(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
	state.styles.delete(&id)?;
	Ok(StatusCode::NO_CONTENT)
}

// --- sprites ---------------------------------------------------------------------

fn parse_sprite_info(raw: &str) -> Option<(String, i64, bool)> {
	let (stem, ext) = raw.rsplit_once('.')?;
	let is_json = match ext {
		"json" => true,
		"png" => false,
		_ => return None,
	};

	match stem.rsplit_once('@') {
		Some((id, density_part)) => {
			let density_str = density_part.strip_suffix('x')?;
			let density: f64 = density_str.parse().ok()?;
			Some((id.to_string(), density.round() as i64, is_json))
		}
		None => Some((stem.to_string(), 1, is_json)),
	}
}

pub async fn get_sprite(State(state): State<AppState>, Path((_style_id, sprite_info)): Path<(String, String)>) -> Result<Response, ApiError> {
	let (sprite_id, density, is_json) = parse_sprite_info(&sprite_info).ok_or(AppError::NotFound)?;
	let sprite = state.sprites.get(&sprite_id, density, true)?;

	if is_json {
		Ok(Json(sprite.layout).into_response())
	} else {
		Ok(([(header::CONTENT_TYPE, "image/png")], sprite.data).into_response())
	}
}

// --- fonts ---------------------------------------------------------------------

fn parse_glyph_range(raw: &str) -> Option<(u32, u32)> {
	let stem = raw.strip_suffix(".pbf")?;
	let (start, end) = stem.split_once('-')?;
	Some((start.parse().ok()?, end.parse().ok()?))
}

pub async fn get_glyphs(
	State(state): State<AppState>,
	Path((fontstack, range)): Path<(String, String)>,
	Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
	let (start, end) = parse_glyph_range(&range).ok_or(AppError::InvalidGlyphsRange { start: 0, end: 0 })?;
	let style_id = params.get("styleId").cloned();
	let access_token = params.get("access_token").cloned().or_else(|| state.default_access_token.clone());

	let response = state.glyphs.get(style_id.as_deref(), access_token.as_deref(), &fontstack, start, end).await?;

	match response {
		tilekeep_services::GlyphResponse::File(path) => {
			let bytes = tokio::fs::read(&path).await.map_err(|e| AppError::Internal(e.into()))?;
			Ok(([(header::CONTENT_TYPE, "application/x-protobuf")], bytes).into_response())
		}
		tilekeep_services::GlyphResponse::Raw { data, etag } => {
			let mut builder = Response::builder().status(StatusCode::OK).header(header::CONTENT_TYPE, "application/x-protobuf");
			if let Some(etag) = etag {
				builder = builder.header(header::ETAG, etag);
			}
			Ok(builder.body(Body::from(data)).expect("glyph response should build"))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_sprite_without_density() {
		assert_eq!(parse_sprite_info("abc123.png"), Some(("abc123".to_string(), 1, false)));
	}

	#[test]
	fn parses_sprite_with_density_and_json_extension() {
		assert_eq!(parse_sprite_info("abc123@2x.json"), Some(("abc123".to_string(), 2, true)));
	}

	#[test]
	fn rejects_unknown_extension() {
		assert_eq!(parse_sprite_info("abc123.webp"), None);
	}

	#[test]
	fn parses_glyph_range() {
		assert_eq!(parse_glyph_range("0-255.pbf"), Some((0, 255)));
		assert_eq!(parse_glyph_range("malformed"), None);
	}
}
