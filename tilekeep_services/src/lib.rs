//! Application services: everything between the HTTP surface and the store.

pub mod glyphs;
pub mod import;
pub mod sprites;
pub mod styles;
pub mod tiles;
pub mod tilesets;
pub mod upstream;

pub use glyphs::{GlyphResponse, GlyphsService};
pub use import::{ImportCoordinator, ImportMessage, ImportOutcome};
pub use sprites::{FetchedSprite, SpritesService};
pub use styles::{CreateStyleOptions, StylesService};
pub use tiles::{TileResponse, TilesService};
pub use tilesets::TilesetsService;
pub use upstream::{ResponseType, UpstreamManager};
