//! The two-phase generate-then-upload render pipeline.
//!
//! Phase one composites the scene, splits the coarse LOD into 24 in-memory
//! tiles, uploads them in parallel and publishes `metadata.json` with
//! `status: "processing"`; at that point a viewer can already display the
//! panorama. Phase two splits and uploads the 96 fine-LOD tiles from the
//! retained scene image and rewrites the metadata as `status: "ready"`.
//!
//! The pipeline runs on a background task: failures never reach the original
//! HTTP response and surface via the status endpoint instead. Upload progress
//! flows as messages into the registry and the NDJSON event log.

use crate::loader::load_client_config;
use crate::server::state::{AppState, SharedState};
use anyhow::{Context, Result};
use panotiles_core::{BuildMetadata, BuildState, StatusPatch, events_key, resolve_scene_context, service_error, unix_now};
use panotiles_render::{TILE_SIZE, TileBlob, clamp_face_workers, split_to_memory, stack_layers};
use panotiles_store::ObjectStore;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, mpsc};

/// Progress denominator floor: the registry reports against at least this
/// many tiles so early LOD0 uploads don't read as near-complete.
pub const DEFAULT_TILES_TOTAL: u32 = 48;

pub struct RenderJob {
	pub client: String,
	pub scene: String,
	pub selection: HashMap<String, String>,
	pub build: String,
	pub tile_root: String,
	pub metadata_key: String,
	pub render_key: String,
}

/// Background entry point. Owns the active-render marker and the capacity
/// permit; both are released on every exit path.
pub async fn render_build(state: SharedState, job: RenderJob, permit: Option<OwnedSemaphorePermit>) {
	let started = Instant::now();
	log::info!("background render started for {}", job.render_key);

	if let Err(err) = run(&state, &job).await {
		log::error!("background render failed for {}: {err:#}", job.render_key);
		let detail = service_error(&err).map_or_else(|| format!("{err:#}"), |cause| cause.to_string());
		state.registry.set_status(
			&job.build,
			BuildState::Error,
			StatusPatch {
				error: Some(detail),
				failed_at: Some(unix_now()),
				..Default::default()
			},
		);
	}

	state.finish_render(&job.render_key);
	drop(permit);
	log::info!(
		"background render for {} finished in {:.2}s",
		job.render_key,
		started.elapsed().as_secs_f64()
	);
}

async fn run(state: &AppState, job: &RenderJob) -> Result<()> {
	let (event_tx, event_rx) = mpsc::unbounded_channel::<Value>();
	let appender = tokio::spawn(append_events(
		Arc::clone(&state.store),
		events_key(&job.tile_root),
		event_rx,
	));

	let result = run_phases(state, job, &event_tx).await;

	// Close the channel and let the appender drain before reporting.
	drop(event_tx);
	let _ = appender.await;
	result
}

async fn run_phases(state: &AppState, job: &RenderJob, event_tx: &mpsc::UnboundedSender<Value>) -> Result<()> {
	let (project, _naming) = load_client_config(state.store.as_ref(), &job.client).await?;
	let ctx = resolve_scene_context(&project, Some(&job.scene), &state.config.cache_root, None)?;

	// Composite once; the stacked image is retained and reused for the fine LOD.
	let stack = stack_layers(
		&state.resolver,
		&ctx.scene_id,
		&ctx.layers,
		&job.selection,
		&ctx.assets_root,
		"",
	)
	.await?;

	let quality = state.config.jpeg_quality;
	let face_workers = clamp_face_workers(state.config.face_workers);
	let tile_workers = state.config.tile_workers.max(1);

	// --- Phase 1: coarse LOD, user-visible as soon as it lands ---
	let lod0_started = Instant::now();
	let build = job.build.clone();
	let (stack, lod0_tiles) = tokio::task::spawn_blocking(move || {
		let tiles = split_to_memory(&stack, TILE_SIZE, &build, 0, 0, quality, face_workers)?;
		Ok::<_, anyhow::Error>((stack, tiles))
	})
	.await
	.context("splitter worker panicked")??;
	let lod0_count = lod0_tiles.len() as u32;

	state.registry.set_status(
		&job.build,
		BuildState::Uploading,
		StatusPatch {
			tile_root: Some(job.tile_root.clone()),
			tiles_total: Some(DEFAULT_TILES_TOTAL.max(lod0_count)),
			tiles_uploaded: Some(0),
			progress: Some(0.0),
			..Default::default()
		},
	);

	upload_tiles(state, job, lod0_tiles, tile_workers, event_tx).await?;

	state.registry.set_status(
		&job.build,
		BuildState::Processing,
		StatusPatch {
			lod_ready: Some(0),
			faces_ready: Some(true),
			tiles_ready: Some(true),
			..Default::default()
		},
	);
	let metadata = BuildMetadata {
		client: job.client.clone(),
		scene: job.scene.clone(),
		build: job.build.clone(),
		tile_root: job.tile_root.clone(),
		generated_at: unix_now(),
		status: "processing".to_string(),
		last_stage: "lod0_ready".to_string(),
		lod0_tiles_count: Some(lod0_count),
		tiles_count: None,
	};
	state
		.store
		.put_json(&job.metadata_key, &serde_json::to_value(&metadata)?)
		.await?;
	log::info!(
		"lod 0 ready for {} in {:.2}s ({lod0_count} tiles)",
		job.render_key,
		lod0_started.elapsed().as_secs_f64()
	);

	// --- Phase 2: fine LOD ---
	let build = job.build.clone();
	let lod1_tiles =
		tokio::task::spawn_blocking(move || split_to_memory(&stack, TILE_SIZE, &build, 1, 1, quality, face_workers))
			.await
			.context("splitter worker panicked")??;
	let tiles_count = lod0_count + lod1_tiles.len() as u32;

	state
		.registry
		.set_status(&job.build, BuildState::Uploading, StatusPatch::default());
	upload_tiles(state, job, lod1_tiles, tile_workers, event_tx).await?;

	let metadata = BuildMetadata {
		status: "ready".to_string(),
		last_stage: "lod1_ready".to_string(),
		generated_at: unix_now(),
		lod0_tiles_count: Some(lod0_count),
		tiles_count: Some(tiles_count),
		..metadata
	};
	state
		.store
		.put_json(&job.metadata_key, &serde_json::to_value(&metadata)?)
		.await?;

	let _ = event_tx.send(json!({"state": "ready", "build": job.build, "tiles_count": tiles_count}));

	state.registry.set_status(
		&job.build,
		BuildState::Completed,
		StatusPatch {
			lod_ready: Some(1),
			progress: Some(1.0),
			completed_at: Some(unix_now()),
			..Default::default()
		},
	);
	log::info!("build {} completed with {tiles_count} tiles", job.build);
	Ok(())
}

/// Uploads one LOD's tiles in parallel, feeding the registry and the event
/// log as individual uploads land.
async fn upload_tiles(
	state: &AppState,
	job: &RenderJob,
	tiles: Vec<TileBlob>,
	workers: usize,
	event_tx: &mpsc::UnboundedSender<Value>,
) -> Result<()> {
	let mut lods: HashMap<String, u8> = HashMap::with_capacity(tiles.len());
	let mut items = Vec::with_capacity(tiles.len());
	for tile in tiles {
		lods.insert(tile.filename.clone(), tile.lod);
		items.push((format!("{}/{}", job.tile_root, tile.filename), tile.bytes));
	}

	let registry = &state.registry;
	let build = job.build.clone();
	let on_uploaded = move |key: &str| {
		registry.increment_tiles_uploaded(&build);
		if let Some(filename) = key.rsplit('/').next() {
			let lod = lods.get(filename).copied().unwrap_or(0);
			let _ = event_tx.send(json!({"tile": filename, "state": "visible", "lod": lod}));
		}
	};

	state.store.put_tiles_parallel(items, workers, &on_uploaded).await
}

/// Single consumer of upload events: stamps a sequence number and appends
/// each event to the build's NDJSON log.
async fn append_events(store: Arc<dyn ObjectStore>, key: String, mut events: mpsc::UnboundedReceiver<Value>) {
	let mut seq = 0u64;
	while let Some(mut event) = events.recv().await {
		if let Some(object) = event.as_object_mut() {
			object.insert("seq".to_string(), json!(seq));
		}
		seq += 1;
		if let Err(err) = store.append_jsonl(&key, &event).await {
			log::warn!("could not append tile event to '{key}': {err:#}");
		}
	}
}
