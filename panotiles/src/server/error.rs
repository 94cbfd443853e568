//! Error-to-response mapping.
//!
//! Internals work with `anyhow` chains carrying a tagged
//! [`ServiceError`](panotiles_core::ServiceError) root cause. At the HTTP
//! boundary the chain is downcast into a status code plus a small JSON body
//! `{detail, kind}`; no backtraces ever cross the API.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use panotiles_core::{ServiceError, service_error};
use serde_json::json;

#[derive(Debug)]
pub struct ApiError {
	pub status: StatusCode,
	pub kind: &'static str,
	pub detail: String,
}

impl ApiError {
	pub fn new(status: StatusCode, kind: &'static str, detail: impl Into<String>) -> Self {
		Self {
			status,
			kind,
			detail: detail.into(),
		}
	}

	pub fn bad_request(detail: impl Into<String>) -> Self {
		Self::new(StatusCode::BAD_REQUEST, "invalid-input", detail)
	}
}

impl From<anyhow::Error> for ApiError {
	fn from(err: anyhow::Error) -> Self {
		match service_error(&err) {
			Some(cause) => {
				let status = match cause {
					ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
					ServiceError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
					ServiceError::NotFound(_) | ServiceError::AssetMissing(_) => StatusCode::NOT_FOUND,
					ServiceError::ConfigInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
					ServiceError::UploadFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
				};
				Self::new(status, cause.kind(), cause.to_string())
			}
			None => {
				log::error!("internal error: {err:#}");
				Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal error")
			}
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		(self.status, Json(json!({"detail": self.detail, "kind": self.kind}))).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case(ServiceError::InvalidInput("bad".into()), StatusCode::BAD_REQUEST, "invalid-input")]
	#[case(ServiceError::TooManyRequests("slow down".into()), StatusCode::TOO_MANY_REQUESTS, "too-many-requests")]
	#[case(ServiceError::NotFound("gone".into()), StatusCode::NOT_FOUND, "not-found")]
	#[case(ServiceError::ConfigInvalid("broken".into()), StatusCode::UNPROCESSABLE_ENTITY, "config-invalid")]
	#[case(ServiceError::AssetMissing("no base".into()), StatusCode::NOT_FOUND, "asset-missing")]
	#[case(ServiceError::UploadFailed { count: 2 }, StatusCode::INTERNAL_SERVER_ERROR, "upload-failed")]
	fn taxonomy_maps_to_status_codes(
		#[case] cause: ServiceError,
		#[case] status: StatusCode,
		#[case] kind: &'static str,
	) {
		let api: ApiError = anyhow::Error::from(cause).context("while handling request").into();
		assert_eq!(api.status, status);
		assert_eq!(api.kind, kind);
	}

	#[test]
	fn untagged_errors_are_opaque_500s() {
		let api: ApiError = anyhow::anyhow!("sqlite went away at /var/data/x").into();
		assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
		assert_eq!(api.detail, "internal error");
	}
}
