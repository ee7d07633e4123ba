//! Router composition: wires `handlers` onto their paths.

use super::handlers;
use super::state::AppState;
use axum::Router;
use axum::routing::{get, post};

pub fn build_router(state: AppState) -> Router {
	Router::new()
		.route("/status", get(handlers::status))
		.route("/tilesets", get(handlers::list_tilesets).post(handlers::create_tileset))
		.route("/tilesets/import", post(handlers::import_mbtiles))
		.route("/tilesets/{id}", get(handlers::get_tileset).put(handlers::put_tileset))
		.route("/tilesets/{id}/{z}/{x}/{y}", get(handlers::get_tile))
		.route("/imports/progress/{importId}", get(handlers::import_progress))
		.route("/styles", get(handlers::list_styles).post(handlers::create_style))
		.route("/styles/{id}", get(handlers::get_style).delete(handlers::delete_style))
		.route("/styles/{styleId}/sprites/{spriteInfo}", get(handlers::get_sprite))
		.route("/fonts/{fontstack}/{range}", get(handlers::get_glyphs))
		.with_state(state)
}
