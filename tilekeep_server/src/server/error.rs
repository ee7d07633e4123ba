//! Maps the service-layer error taxonomy onto HTTP JSON error bodies.
//!
//! `tilekeep_core::error::AppError` carries no Axum dependency, so the
//! `IntoResponse` impl has to live here behind a thin newtype (the orphan
//! rule forbids implementing a foreign trait for a foreign type directly).

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tilekeep_core::error::AppError;

pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
	fn from(err: AppError) -> ApiError {
		ApiError(err)
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.0.status_code();
		if status == StatusCode::INTERNAL_SERVER_ERROR {
			log::error!("request failed: {}", self.0);
		} else {
			log::debug!("request failed: {}", self.0);
		}

		let body = json!({
			"code": self.0.code(),
			"statusCode": status.as_u16(),
			"message": self.0.to_string(),
		});

		(status, Json(body)).into_response()
	}
}
