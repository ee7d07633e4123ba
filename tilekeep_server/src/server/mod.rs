//! HTTP server lifecycle and composition.
//!
//! - `handlers` implement the concrete HTTP handlers.
//! - `routes` composes handlers into an Axum `Router`.
//! - `cors` builds a `CorsLayer` from configurable origin patterns.
//! - `error` maps `AppError` onto JSON error responses.
//! - `tile_server` owns lifecycle concerns: binding, middleware, shutdown.

mod cors;
mod error;
mod handlers;
mod routes;
mod state;
mod tile_server;

pub use state::AppState;
pub use tile_server::TileServer;
