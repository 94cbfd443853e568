//! Error taxonomy shared by all crates of the workspace.
//!
//! Functions return `anyhow::Result` and attach a [`ServiceError`] as the root
//! cause wherever the HTTP layer needs to distinguish failure kinds. The
//! server downcasts the error chain with [`service_error`] to map onto status
//! codes; everything without a tagged root cause is treated as internal.

use thiserror::Error;

/// Failure kinds that cross the API boundary.
#[derive(Debug, Error)]
pub enum ServiceError {
	/// Rejected by a validator or a dimension check before any work started.
	#[error("{0}")]
	InvalidInput(String),

	/// Rejected by the global rate limiter.
	#[error("{0}")]
	TooManyRequests(String),

	/// A referenced object (config, metadata, tile) does not exist.
	#[error("{0}")]
	NotFound(String),

	/// Tenant configuration failed to parse or validate.
	#[error("{0}")]
	ConfigInvalid(String),

	/// A required asset could not be resolved locally or remotely.
	#[error("{0}")]
	AssetMissing(String),

	/// Aggregate of worker failures reported by an upload phase.
	#[error("{count} tile upload(s) failed")]
	UploadFailed { count: usize },
}

impl ServiceError {
	/// Stable label included in API error bodies.
	pub fn kind(&self) -> &'static str {
		match self {
			ServiceError::InvalidInput(_) => "invalid-input",
			ServiceError::TooManyRequests(_) => "too-many-requests",
			ServiceError::NotFound(_) => "not-found",
			ServiceError::ConfigInvalid(_) => "config-invalid",
			ServiceError::AssetMissing(_) => "asset-missing",
			ServiceError::UploadFailed { .. } => "upload-failed",
		}
	}
}

/// Finds the first [`ServiceError`] in an `anyhow` error chain, if any.
pub fn service_error(err: &anyhow::Error) -> Option<&ServiceError> {
	err.chain().find_map(|cause| cause.downcast_ref::<ServiceError>())
}
