//! Process-local build-status registry.
//!
//! Tracks the upload progress of every build this process has worked on since
//! startup. The registry is deliberately in-memory only: after a restart a
//! status query returns `idle` and callers fall back to polling the published
//! metadata document. All mutation goes through the two mutators so the
//! derived fields (`progress`, `percent_complete`) stay consistent.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Lifecycle of a build inside this process.
///
/// `processing → uploading → completed`, with any state able to move to
/// `error`. `idle` is the synthetic state reported for unknown builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
	#[default]
	Idle,
	Processing,
	Uploading,
	Completed,
	Error,
}

/// Progress record of one build. Optional fields are omitted from API
/// responses while unknown.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildStatus {
	pub status: BuildState,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tile_root: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tiles_uploaded: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tiles_total: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub progress: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub percent_complete: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub faces_ready: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tiles_ready: Option<bool>,
	/// Highest fully published LOD: -1 none, 0 coarse, 1 fine.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub lod_ready: Option<i8>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub started_at: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub completed_at: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub failed_at: Option<u64>,
}

/// Merge-update applied by [`StatusRegistry::set_status`]. `None` fields are
/// left untouched.
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
	pub tile_root: Option<String>,
	pub tiles_uploaded: Option<u32>,
	pub tiles_total: Option<u32>,
	pub progress: Option<f64>,
	pub percent_complete: Option<f64>,
	pub faces_ready: Option<bool>,
	pub tiles_ready: Option<bool>,
	pub lod_ready: Option<i8>,
	pub error: Option<String>,
	pub started_at: Option<u64>,
	pub completed_at: Option<u64>,
	pub failed_at: Option<u64>,
}

/// Mutex-guarded map from build string to progress record.
#[derive(Debug, Default)]
pub struct StatusRegistry {
	builds: Mutex<HashMap<String, BuildStatus>>,
}

impl StatusRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Moves a build to `status` and merges the patch into its record,
	/// recomputing `percent_complete` from `progress` unless the patch sets it
	/// explicitly.
	pub fn set_status(&self, build: &str, status: BuildState, patch: StatusPatch) {
		let mut builds = self.builds.lock();
		let entry = builds.entry(build.to_string()).or_default();
		entry.status = status;

		if patch.tile_root.is_some() {
			entry.tile_root = patch.tile_root;
		}
		if patch.tiles_uploaded.is_some() {
			entry.tiles_uploaded = patch.tiles_uploaded;
		}
		if patch.tiles_total.is_some() {
			entry.tiles_total = patch.tiles_total;
		}
		if patch.progress.is_some() {
			entry.progress = patch.progress;
		}
		if patch.faces_ready.is_some() {
			entry.faces_ready = patch.faces_ready;
		}
		if patch.tiles_ready.is_some() {
			entry.tiles_ready = patch.tiles_ready;
		}
		if patch.lod_ready.is_some() {
			entry.lod_ready = patch.lod_ready;
		}
		if patch.error.is_some() {
			entry.error = patch.error;
		}
		if patch.started_at.is_some() {
			entry.started_at = patch.started_at;
		}
		if patch.completed_at.is_some() {
			entry.completed_at = patch.completed_at;
		}
		if patch.failed_at.is_some() {
			entry.failed_at = patch.failed_at;
		}

		entry.percent_complete = match patch.percent_complete {
			Some(value) => Some(value),
			None => entry.progress,
		};
	}

	/// Atomically bumps `tiles_uploaded`, capped at `tiles_total` when known,
	/// and recomputes `progress`.
	pub fn increment_tiles_uploaded(&self, build: &str) {
		let mut builds = self.builds.lock();
		let entry = builds.entry(build.to_string()).or_default();

		let mut uploaded = entry.tiles_uploaded.unwrap_or(0) + 1;
		if let Some(total) = entry.tiles_total {
			uploaded = uploaded.min(total);
			if total > 0 {
				entry.progress = Some(f64::from(uploaded) / f64::from(total));
			}
		}
		entry.tiles_uploaded = Some(uploaded);
		entry.percent_complete = entry.progress;
	}

	/// Returns the build's record, or an `idle` record for unknown builds.
	pub fn get(&self, build: &str) -> BuildStatus {
		self.builds.lock().get(build).cloned().unwrap_or_default()
	}
}

/// Seconds since the unix epoch, for `started_at`-style fields.
pub fn unix_now() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}
