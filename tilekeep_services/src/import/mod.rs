//! MBTiles import: a coordinator that owns lifecycle and progress fan-out,
//! and a worker that does the blocking SQLite streaming.

mod coordinator;
mod mbtiles;
mod worker;

pub use coordinator::{ImportCoordinator, ImportOutcome};
pub use mbtiles::extract_tilejson;

/// Broadcast over `ImportCoordinator::subscribe`, and mirrored into the
/// `imports` table so a client that misses the live stream can poll instead.
#[derive(Debug, Clone)]
pub enum ImportMessage {
	Progress { so_far: i64, total: i64 },
	Complete { total: i64 },
	Error { message: String },
}

/// Milliseconds since the epoch. `std::time::SystemTime` is used instead of
/// `std::time::Instant` here, since `Import.started` is a wall-clock
/// timestamp persisted to the store rather than a monotonic duration.
pub(crate) fn time_now_millis() -> i64 {
	use std::time::{SystemTime, UNIX_EPOCH};
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}
