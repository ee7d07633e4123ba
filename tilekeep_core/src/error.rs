//! The error taxonomy services return to the transport layer.
//!
//! Each variant maps to exactly one HTTP status code. Infrastructure failures
//! (disk I/O, SQL, HTTP transport internals) are carried in `anyhow::Error`
//! wrapped by [`AppError::Internal`]; the transport layer never inspects
//! those beyond logging them and returning 500.

use http::StatusCode;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
	#[error("not found")]
	NotFound,

	#[error("already exists")]
	AlreadyExists,

	#[error("mismatched id: url id '{url_id}' does not match body id '{body_id}'")]
	MismatchedId { url_id: String, body_id: String },

	#[error("unsupported source: {0}")]
	UnsupportedSource(String),

	#[error("a Mapbox access token is required for this upstream URL")]
	MbAccessTokenRequired,

	#[error("invalid glyph range {start}-{end}")]
	InvalidGlyphsRange { start: u32, end: u32 },

	#[error("unsupported mbtiles tile format: {0}")]
	UnsupportedMbtilesFormat(String),

	#[error("mbtiles import target missing or unreadable: {0}")]
	MbtilesImportTargetMissing(String),

	#[error("mbtiles metadata is not valid TileJSON: {0}")]
	MbtilesInvalidMetadata(String),

	#[error("mbtiles file could not be read: {0}")]
	MbtilesCannotRead(String),

	#[error("upstream returned schema-invalid JSON: {0}")]
	UpstreamJsonValidation(String),

	#[error("upstream request failed with status {0}")]
	ForwardedUpstream(StatusCode),

	#[error("failed to parse stored JSON: {0}")]
	Parse(String),

	#[error("import timed out waiting for worker progress")]
	Timeout,

	#[error(transparent)]
	Internal(#[from] anyhow::Error),
}

impl AppError {
	pub fn status_code(&self) -> StatusCode {
		match self {
			AppError::NotFound => StatusCode::NOT_FOUND,
			AppError::AlreadyExists => StatusCode::CONFLICT,
			AppError::MismatchedId { .. }
			| AppError::UnsupportedSource(_)
			| AppError::InvalidGlyphsRange { .. }
			| AppError::UnsupportedMbtilesFormat(_)
			| AppError::MbtilesImportTargetMissing(_)
			| AppError::MbtilesInvalidMetadata(_) => StatusCode::BAD_REQUEST,
			AppError::MbAccessTokenRequired => StatusCode::UNAUTHORIZED,
			AppError::MbtilesCannotRead(_) | AppError::UpstreamJsonValidation(_) | AppError::Parse(_) | AppError::Timeout => {
				StatusCode::INTERNAL_SERVER_ERROR
			}
			AppError::ForwardedUpstream(status) => *status,
			AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	/// The stable machine-readable `code` field of the JSON error body.
	pub fn code(&self) -> &'static str {
		match self {
			AppError::NotFound => "NotFound",
			AppError::AlreadyExists => "AlreadyExists",
			AppError::MismatchedId { .. } => "MismatchedId",
			AppError::UnsupportedSource(_) => "UnsupportedSource",
			AppError::MbAccessTokenRequired => "MBAccessTokenRequired",
			AppError::InvalidGlyphsRange { .. } => "InvalidGlyphsRange",
			AppError::UnsupportedMbtilesFormat(_) => "UnsupportedMBTilesFormat",
			AppError::MbtilesImportTargetMissing(_) => "MBTilesImportTargetMissing",
			AppError::MbtilesInvalidMetadata(_) => "MBTilesInvalidMetadata",
			AppError::MbtilesCannotRead(_) => "MBTilesCannotRead",
			AppError::UpstreamJsonValidation(_) => "UpstreamJsonValidation",
			AppError::ForwardedUpstream(_) => "ForwardedUpstream",
			AppError::Parse(_) => "Parse",
			AppError::Timeout => "Timeout",
			AppError::Internal(_) => "Internal",
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case(AppError::NotFound, StatusCode::NOT_FOUND)]
	#[case(AppError::AlreadyExists, StatusCode::CONFLICT)]
	#[case(AppError::MbAccessTokenRequired, StatusCode::UNAUTHORIZED)]
	#[case(AppError::Timeout, StatusCode::INTERNAL_SERVER_ERROR)]
	#[case(AppError::ForwardedUpstream(StatusCode::BAD_GATEWAY), StatusCode::BAD_GATEWAY)]
	fn maps_to_expected_status(#[case] err: AppError, #[case] expected: StatusCode) {
		assert_eq!(err.status_code(), expected);
	}
}
