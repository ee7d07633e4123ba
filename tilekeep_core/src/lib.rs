//! Id derivation, tile addressing, JSON document validation and the error
//! taxonomy shared by every other `tilekeep` crate. No I/O lives here.

pub mod error;
pub mod id;
pub mod json;
pub mod tile_address;

pub use error::{AppError, AppResult};
