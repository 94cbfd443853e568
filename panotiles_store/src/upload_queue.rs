//! Bounded upload queue for disk-backed tile generation.
//!
//! The streaming split path writes tiles to a scratch directory and hands
//! them to this queue, which uploads them with a bounded worker pool, tracks
//! per-tile state, deletes each local file after the attempt (success or
//! failure) and emits state changes as messages on an mpsc channel. When more
//! than the in-flight bound is queued, `enqueue` blocks the producer.

use crate::traits::ObjectStore;
use anyhow::Result;
use panotiles_core::ServiceError;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

/// Maximum number of tiles between `enqueue` and upload completion before the
/// producer blocks.
pub const DEFAULT_INFLIGHT_LIMIT: usize = 256;

/// Default I/O worker bound: `min(8, 2·cpu_count)`.
pub fn default_upload_workers() -> usize {
	(num_cpus::get() * 2).clamp(1, 8)
}

/// Per-tile lifecycle. A failed upload leaves the tile in whatever state it
/// reached; the failure itself is reported by `close_and_wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TileState {
	Generated,
	Queued,
	Uploading,
	Visible,
}

/// State-change message emitted towards the registry/event-log consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileEvent {
	pub tile: String,
	pub state: TileState,
	pub lod: u8,
}

pub struct TileUploadQueue {
	tile_root: String,
	store: Arc<dyn ObjectStore>,
	worker_slots: Arc<Semaphore>,
	backpressure: Arc<Semaphore>,
	states: Arc<Mutex<HashMap<String, TileState>>>,
	uploaded: Arc<AtomicUsize>,
	errors: Arc<Mutex<Vec<anyhow::Error>>>,
	tasks: Vec<JoinHandle<()>>,
	event_tx: Option<mpsc::UnboundedSender<TileEvent>>,
	started: bool,
	closed: bool,
}

impl TileUploadQueue {
	pub fn new(
		tile_root: impl Into<String>,
		store: Arc<dyn ObjectStore>,
		workers: usize,
		event_tx: Option<mpsc::UnboundedSender<TileEvent>>,
	) -> Self {
		Self {
			tile_root: tile_root.into(),
			store,
			worker_slots: Arc::new(Semaphore::new(workers.max(1))),
			backpressure: Arc::new(Semaphore::new(DEFAULT_INFLIGHT_LIMIT)),
			states: Arc::new(Mutex::new(HashMap::new())),
			uploaded: Arc::new(AtomicUsize::new(0)),
			errors: Arc::new(Mutex::new(Vec::new())),
			tasks: Vec::new(),
			event_tx,
			started: false,
			closed: false,
		}
	}

	/// Lowers the in-flight bound; intended for tests.
	pub fn with_inflight_limit(mut self, limit: usize) -> Self {
		self.backpressure = Arc::new(Semaphore::new(limit.max(1)));
		self
	}

	pub fn start(&mut self) {
		self.started = true;
		log::debug!("upload queue started for '{}'", self.tile_root);
	}

	/// Hands a generated tile file over for upload. Blocks once the in-flight
	/// bound is reached, which backpressures the producing splitter.
	pub async fn enqueue(&mut self, local_path: PathBuf, filename: &str, lod: u8) {
		assert!(self.started && !self.closed, "enqueue on a queue that is not running");

		self.set_state(filename, TileState::Generated, lod);
		log::debug!("tile generated: {filename}");

		let permit = Arc::clone(&self.backpressure)
			.acquire_owned()
			.await
			.expect("backpressure semaphore closed");
		self.set_state(filename, TileState::Queued, lod);
		log::debug!("upload queued: {filename}");

		let key = format!("{}/{}", self.tile_root, filename);
		let filename = filename.to_string();
		let store = Arc::clone(&self.store);
		let worker_slots = Arc::clone(&self.worker_slots);
		let states = Arc::clone(&self.states);
		let uploaded = Arc::clone(&self.uploaded);
		let errors = Arc::clone(&self.errors);
		let event_tx = self.event_tx.clone();

		self.tasks.push(tokio::spawn(async move {
			let _slot = worker_slots.acquire_owned().await.expect("worker semaphore closed");

			states.lock().insert(filename.clone(), TileState::Uploading);
			emit(&event_tx, &filename, TileState::Uploading, lod);
			log::debug!("upload started: {filename}");

			match store.put_file(&local_path, &key, "image/jpeg").await {
				Ok(()) => {
					states.lock().insert(filename.clone(), TileState::Visible);
					emit(&event_tx, &filename, TileState::Visible, lod);
					uploaded.fetch_add(1, Ordering::SeqCst);
					log::debug!("upload completed: {filename}");
				}
				Err(err) => {
					log::error!("tile upload failed for '{filename}': {err:#}");
					errors.lock().push(err);
				}
			}

			// The local file is gone after the attempt, success or failure.
			match tokio::fs::remove_file(&local_path).await {
				Ok(()) => log::debug!("local file removed: {filename}"),
				Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
				Err(err) => log::warn!("could not remove local tile {local_path:?}: {err}"),
			}

			drop(permit);
		}));
	}

	/// Signals end of input and waits for all in-flight uploads. Idempotent.
	/// Fails with an aggregate *upload-failed* error when any upload failed.
	pub async fn close_and_wait(&mut self) -> Result<()> {
		if self.closed {
			return Ok(());
		}
		self.closed = true;

		for task in self.tasks.drain(..) {
			let _ = task.await;
		}

		let failed = self.errors.lock().len();
		if failed > 0 {
			return Err(ServiceError::UploadFailed { count: failed }.into());
		}
		Ok(())
	}

	pub fn uploaded_count(&self) -> usize {
		self.uploaded.load(Ordering::SeqCst)
	}

	pub fn states(&self) -> HashMap<String, TileState> {
		self.states.lock().clone()
	}

	fn set_state(&self, filename: &str, state: TileState, lod: u8) {
		self.states.lock().insert(filename.to_string(), state);
		emit(&self.event_tx, filename, state, lod);
	}
}

fn emit(event_tx: &Option<mpsc::UnboundedSender<TileEvent>>, tile: &str, state: TileState, lod: u8) {
	if let Some(tx) = event_tx {
		let _ = tx.send(TileEvent {
			tile: tile.to_string(),
			state,
			lod,
		});
	}
}
