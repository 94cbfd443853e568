//! The backend-polymorphic object-store interface.

use anyhow::Result;
use futures::StreamExt;
use panotiles_core::ServiceError;
use serde_json::Value;
use std::path::Path;

/// Cache policy for published tiles: tile keys are content-addressed by the
/// build string, so they never change once written.
pub const CACHE_CONTROL_IMMUTABLE: &str = "public, max-age=31536000, immutable";
/// Cache policy for `metadata.json`, which is rewritten once per build.
pub const CACHE_CONTROL_METADATA: &str = "public, max-age=300";
/// Cache policy for the NDJSON event log, which is append-only and polled.
pub const CACHE_CONTROL_NO_CACHE: &str = "no-cache";

/// Cache-control header a backend must attach, derived from the key suffix.
pub fn cache_control_for_key(key: &str) -> Option<&'static str> {
	if key.ends_with(".jpg") || key.ends_with(".jpeg") {
		Some(CACHE_CONTROL_IMMUTABLE)
	} else if key.ends_with(".ndjson") {
		Some(CACHE_CONTROL_NO_CACHE)
	} else if key.ends_with(".json") {
		Some(CACHE_CONTROL_METADATA)
	} else {
		None
	}
}

/// Uniform key-addressed blob interface over the local staging filesystem and
/// the production S3-compatible store.
///
/// Failure semantics: `get_json` distinguishes *not-found* (a tagged
/// [`ServiceError::NotFound`] root cause) from invalid JSON and other IO
/// errors; `exists` surfaces IO errors instead of treating them as a miss.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
	async fn exists(&self, key: &str) -> Result<bool>;

	/// Uploads a local file. Backends attach [`cache_control_for_key`].
	async fn put_file(&self, src: &Path, key: &str, content_type: &str) -> Result<()>;

	/// Uploads an in-memory blob. Backends attach [`cache_control_for_key`].
	async fn put_bytes(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

	async fn get_json(&self, key: &str) -> Result<Value>;

	async fn put_json(&self, key: &str, value: &Value) -> Result<()>;

	/// Appends one JSON object as a line to an NDJSON key. Append ordering is
	/// guaranteed within a single process only.
	async fn append_jsonl(&self, key: &str, value: &Value) -> Result<()>;

	/// Skips the first `cursor` lines and returns up to `limit` parsed
	/// records plus the cursor one past the last consumed line. Invalid lines
	/// are skipped with a warning; a cursor beyond EOF and a missing key both
	/// yield `([], cursor)`.
	async fn read_jsonl_slice(&self, key: &str, cursor: usize, limit: usize) -> Result<(Vec<Value>, usize)>;

	/// Copies a stored object to a local path, creating parent directories.
	async fn download_file(&self, key: &str, dest: &Path) -> Result<()>;

	/// Absolute public URL of a key. Never a local filesystem path.
	fn public_url(&self, key: &str) -> Result<String>;

	/// Uploads tiles concurrently with a hard worker bound, invoking
	/// `on_uploaded` once per successful upload. Failures are collected and
	/// surfaced as one aggregate error only after every in-flight attempt has
	/// completed.
	async fn put_tiles_parallel(
		&self,
		tiles: Vec<(String, Vec<u8>)>,
		workers: usize,
		on_uploaded: &(dyn for<'a> Fn(&'a str) + Send + Sync),
	) -> Result<()> {
		let workers = workers.max(1);
		let total = tiles.len();
		let failures = parking_lot::Mutex::new(0usize);

		futures::stream::iter(tiles)
			.map(|(key, bytes)| async move {
				let result = self.put_bytes(&key, bytes, "image/jpeg").await;
				(key, result)
			})
			.buffer_unordered(workers)
			.for_each(|(key, result)| {
				match result {
					Ok(()) => on_uploaded(&key),
					Err(err) => {
						log::error!("tile upload failed for '{key}': {err:#}");
						*failures.lock() += 1;
					}
				}
				futures::future::ready(())
			})
			.await;

		let failed = *failures.lock();
		if failed > 0 {
			return Err(ServiceError::UploadFailed { count: failed }.into());
		}
		log::info!("parallel upload finished: {total} tiles (workers={workers})");
		Ok(())
	}
}

/// Shared NDJSON slicing used by both backends.
pub(crate) fn slice_jsonl(content: &str, key: &str, cursor: usize, limit: usize) -> (Vec<Value>, usize) {
	let mut events = Vec::new();
	let mut next_cursor = cursor;

	for (idx, line) in content.lines().enumerate() {
		if idx < cursor {
			continue;
		}
		let line = line.trim();
		if line.is_empty() {
			continue;
		}
		match serde_json::from_str(line) {
			Ok(value) => events.push(value),
			Err(_) => log::warn!("skipping invalid NDJSON line {idx} in '{key}'"),
		}
		next_cursor = idx + 1;
		if events.len() >= limit {
			break;
		}
	}

	(events, next_cursor)
}
