//! Read-through glyph range lookup: static file first, optional upstream
//! fetch per style.

use crate::upstream::{ResponseType, UpstreamManager};
use std::path::PathBuf;
use std::sync::Arc;
use tilekeep_core::error::{AppError, AppResult};
use tilekeep_core::json::is_mapbox_url;
use tilekeep_store::Store;

pub struct GlyphsService {
	store: Arc<Store>,
	upstream: Arc<UpstreamManager>,
	static_dir: PathBuf,
}

pub enum GlyphResponse {
	File(PathBuf),
	Raw { data: Vec<u8>, etag: Option<String> },
}

fn validate_range(start: u32, end: u32) -> AppResult<()> {
	if start % 256 != 0 || start > 65_280 || end != start + 255 {
		return Err(AppError::InvalidGlyphsRange { start, end });
	}
	Ok(())
}

impl GlyphsService {
	pub fn new(store: Arc<Store>, upstream: Arc<UpstreamManager>, static_dir: PathBuf) -> Arc<GlyphsService> {
		Arc::new(GlyphsService { store, upstream, static_dir })
	}

	fn static_path(&self, font: &str, start: u32, end: u32) -> PathBuf {
		let font_with_hyphens = font.replace(' ', "-");
		self.static_dir.join(font_with_hyphens).join(format!("{start}-{end}.pbf"))
	}

	pub async fn get(&self, style_id: Option<&str>, access_token: Option<&str>, font: &str, start: u32, end: u32) -> AppResult<GlyphResponse> {
		validate_range(start, end)?;

		let Some(style_id) = style_id else {
			return self.static_fallback(font, start, end);
		};

		let template = self.store.style_glyphs_template(style_id).map_err(AppError::Internal)?;
		let Some(template) = template else {
			return self.static_fallback(font, start, end);
		};

		if is_mapbox_url(&template) && access_token.is_none() {
			return Err(AppError::MbAccessTokenRequired);
		}

		let mut url = template.replace("{fontstack}", font).replace("{range}", &format!("{start}-{end}"));
		if let Some(token) = access_token {
			let separator = if url.contains('?') { '&' } else { '?' };
			url = format!("{url}{separator}access_token={token}");
		}

		match self.upstream.get_upstream(&url, ResponseType::Buffer, None).await {
			Ok(response) => Ok(GlyphResponse::Raw { data: response.body.into_bytes().to_vec(), etag: response.etag }),
			Err(err) => {
				log::debug!("upstream glyph fetch for style '{style_id}' failed, falling back to static: {err}");
				self.static_fallback(font, start, end)
			}
		}
	}

	fn static_fallback(&self, font: &str, start: u32, end: u32) -> AppResult<GlyphResponse> {
		let path = self.static_path(font, start, end);
		if path.is_file() { Ok(GlyphResponse::File(path)) } else { Err(AppError::NotFound) }
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;
	use tempfile::tempdir;

	fn service(static_dir: PathBuf) -> Arc<GlyphsService> {
		let store = Arc::new(Store::open_in_memory().unwrap());
		let upstream = UpstreamManager::new("tilekeep-test/0.1", Duration::from_secs(5)).unwrap();
		GlyphsService::new(store, upstream, static_dir)
	}

	#[tokio::test]
	async fn rejects_range_not_aligned_to_256() {
		let dir = tempdir().unwrap();
		let svc = service(dir.path().to_path_buf());
		let err = svc.get(None, None, "Roboto Regular", 10, 265).await.unwrap_err();
		assert!(matches!(err, AppError::InvalidGlyphsRange { .. }));
	}

	#[tokio::test]
	async fn serves_static_file_when_present() {
		let dir = tempdir().unwrap();
		std::fs::create_dir_all(dir.path().join("Roboto-Regular")).unwrap();
		std::fs::write(dir.path().join("Roboto-Regular").join("0-255.pbf"), b"glyphdata").unwrap();

		let svc = service(dir.path().to_path_buf());
		let result = svc.get(None, None, "Roboto Regular", 0, 255).await.unwrap();
		match result {
			GlyphResponse::File(path) => assert_eq!(std::fs::read(path).unwrap(), b"glyphdata"),
			GlyphResponse::Raw { .. } => panic!("expected file response"),
		}
	}

	#[tokio::test]
	async fn missing_static_file_is_not_found() {
		let dir = tempdir().unwrap();
		let svc = service(dir.path().to_path_buf());
		let err = svc.get(None, None, "Roboto Regular", 0, 255).await.unwrap_err();
		assert!(matches!(err, AppError::NotFound));
	}
}
