//! Embedded, content-addressed SQLite storage for tiles, styles, sprites,
//! offline areas and import jobs, plus the forward-only migration runner
//! that keeps the schema up to date.

pub mod migrator;
pub mod models;
pub mod store;

pub use store::Store;
