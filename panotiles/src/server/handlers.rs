//! HTTP handlers for the render API.

use crate::loader::load_client_config;
use crate::server::error::ApiError;
use crate::server::pipeline::{self, RenderJob};
use crate::server::state::SharedState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use panotiles_core::{
	BuildState, StatusPatch, TILE_FILE_RE, TILE_ROOT_RE, build_string_from_selection, events_key, metadata_key,
	render_key, resolve_scene_context, tile_root, unix_now, validate_build_string, validate_safe_id,
};
use panotiles_image::encode_jpeg;
use panotiles_render::stack_layers;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct RenderRequest {
	pub client: String,
	pub scene: String,
	pub selection: HashMap<String, String>,
}

/// `POST /api/render`: cache-authoritative admission into the cubemap
/// pipeline. See the response contract in the handler body: `cached` on hit,
/// `processing`/`queued` with 202 otherwise.
pub async fn render(State(state): State<SharedState>, Json(payload): Json<RenderRequest>) -> Result<Response, ApiError> {
	state.check_rate_limit()?;

	validate_safe_id(&payload.client, "client")?;
	validate_safe_id(&payload.scene, "scene")?;

	let (project, _naming) = load_client_config(state.store.as_ref(), &payload.client).await?;
	let ctx = resolve_scene_context(&project, Some(&payload.scene), &state.config.cache_root, None)?;

	let build = build_string_from_selection(ctx.scene_index, &ctx.layers, &payload.selection);
	log::info!("build string: {build}");

	let tile_root = tile_root(&payload.client, &payload.scene, &build);
	let metadata_key = metadata_key(&tile_root);
	let manifest = state.manifest(&tile_root, &build)?;
	let cached = json!({"status": "cached", "build": &build, "tiles": &manifest});
	let processing = json!({"status": "processing", "build": &build, "tiles": &manifest});

	if state.store.exists(&metadata_key).await? {
		log::info!("cache hit: {build}");
		return Ok((StatusCode::OK, Json(cached)).into_response());
	}

	let render_key = render_key(&payload.client, &payload.scene, &build);
	let lock = state.render_lock(&render_key);
	let _guard = lock.lock().await;

	// Re-check under the lock: a concurrent duplicate may have published
	// metadata while this request waited.
	if state.store.exists(&metadata_key).await? {
		return Ok((StatusCode::OK, Json(cached)).into_response());
	}

	if state.is_render_active(&render_key) {
		return Ok((StatusCode::ACCEPTED, Json(processing)).into_response());
	}

	let permit = match &state.capacity {
		None => None,
		Some(slots) => match Arc::clone(slots).try_acquire_owned() {
			Ok(permit) => Some(permit),
			Err(_) => {
				log::info!("render capacity exhausted, queueing {render_key}");
				return Ok((
					StatusCode::ACCEPTED,
					Json(json!({"status": "queued", "build": &build, "tiles": &manifest, "reason": "render_capacity"})),
				)
					.into_response());
			}
		},
	};

	state.begin_render(&render_key);
	state.registry.set_status(
		&build,
		BuildState::Processing,
		StatusPatch {
			tile_root: Some(tile_root.clone()),
			lod_ready: Some(-1),
			started_at: Some(unix_now()),
			..Default::default()
		},
	);

	log::info!("cache miss, scheduling render for {render_key}");
	let job = RenderJob {
		client: payload.client,
		scene: payload.scene,
		selection: payload.selection,
		build: build.clone(),
		tile_root,
		metadata_key,
		render_key,
	};
	tokio::spawn(pipeline::render_build(Arc::clone(&state), job, permit));

	Ok((StatusCode::ACCEPTED, Json(processing)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
	pub client: Option<String>,
	pub scene: Option<String>,
}

/// `GET /api/status/{build}`: progress of a build, merged from the
/// in-process registry and the published metadata document.
pub async fn status(
	State(state): State<SharedState>,
	Path(build): Path<String>,
	Query(query): Query<StatusQuery>,
) -> Result<Response, ApiError> {
	if validate_build_string(&build).is_err() {
		return Ok(Json(json!({"status": "idle"})).into_response());
	}

	let mut manifest = None;
	if let (Some(client), Some(scene)) = (query.client.as_deref(), query.scene.as_deref()) {
		if validate_safe_id(client, "client").is_ok() && validate_safe_id(scene, "scene").is_ok() {
			let root = tile_root(client, scene, &build);
			manifest = state.manifest(&root, &build).ok();

			// The registry is process-local; the published metadata is the
			// durable source of completion.
			if let Ok(metadata) = state.store.get_json(&metadata_key(&root)).await {
				let ready = metadata.get("status").and_then(Value::as_str) == Some("ready");
				let tiles_count = metadata.get("tiles_count").and_then(Value::as_u64).unwrap_or(0) as u32;
				if ready && tiles_count > 0 {
					state.registry.set_status(
						&build,
						BuildState::Completed,
						StatusPatch {
							tile_root: Some(root.clone()),
							tiles_uploaded: Some(tiles_count),
							tiles_total: Some(tiles_count),
							progress: Some(1.0),
							lod_ready: Some(1),
							..Default::default()
						},
					);
				}
			}
		}
	}

	let record = state.registry.get(&build);
	if record.status == BuildState::Idle {
		return Ok(Json(json!({"status": "idle"})).into_response());
	}

	let mut value = serde_json::to_value(&record).map_err(anyhow::Error::from)?;

	// Completion requires published tiles and a finished upload count.
	if record.status == BuildState::Completed {
		let total = record.tiles_total.unwrap_or(0);
		if total == 0 || record.tiles_uploaded.unwrap_or(0) < total {
			value["status"] = json!("uploading");
		}
	}

	if let Some(object) = value.as_object_mut() {
		object.insert("build".to_string(), json!(build));
		if let Some(manifest) = manifest {
			object.insert("tiles".to_string(), serde_json::to_value(manifest).map_err(anyhow::Error::from)?);
		}
	}
	Ok(Json(value).into_response())
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
	pub tile_root: String,
	#[serde(default)]
	pub cursor: usize,
	#[serde(default = "default_events_limit")]
	pub limit: usize,
}

fn default_events_limit() -> usize {
	200
}

/// `GET /api/render/events`: a slice of the build's NDJSON upload log.
pub async fn render_events(
	State(state): State<SharedState>,
	Query(query): Query<EventsQuery>,
) -> Result<Response, ApiError> {
	if !TILE_ROOT_RE.is_match(&query.tile_root) {
		return Err(ApiError::bad_request("invalid tile_root"));
	}
	if query.limit < 1 || query.limit > 500 {
		return Err(ApiError::bad_request("limit must be within 1..=500"));
	}

	let (events, cursor) = state
		.store
		.read_jsonl_slice(&events_key(&query.tile_root), query.cursor, query.limit)
		.await?;

	let completed = events
		.iter()
		.any(|event| event.get("state").and_then(Value::as_str) == Some("ready"));
	let has_more = events.len() == query.limit;

	Ok(
		Json(json!({
			"status": "ok",
			"data": {"events": events, "cursor": cursor, "hasMore": has_more, "completed": completed},
		}))
		.into_response(),
	)
}

/// `POST /api/render2d`: flat single-image render, cached as one JPEG.
pub async fn render2d(
	State(state): State<SharedState>,
	Json(payload): Json<RenderRequest>,
) -> Result<Response, ApiError> {
	validate_safe_id(&payload.client, "client")?;
	validate_safe_id(&payload.scene, "scene")?;

	log::info!("2d render: client={}, scene={}", payload.client, payload.scene);

	let (project, _naming) = load_client_config(state.store.as_ref(), &payload.client).await?;
	let ctx = resolve_scene_context(&project, Some(&payload.scene), &state.config.cache_root, None)?;
	let build = build_string_from_selection(ctx.scene_index, &ctx.layers, &payload.selection);

	let key = format!("clients/{}/renders/{}/2d_{build}.jpg", payload.client, payload.scene);

	if state.store.exists(&key).await? {
		log::info!("2d cache hit: {build}");
		return Ok(
			Json(json!({
				"status": "cached",
				"client": payload.client,
				"scene": payload.scene,
				"build": build,
				"url": state.store.public_url(&key)?,
			}))
			.into_response(),
		);
	}

	let img = stack_layers(
		&state.resolver,
		&ctx.scene_id,
		&ctx.layers,
		&payload.selection,
		&ctx.assets_root,
		"2d_",
	)
	.await?;

	// Encode to a temp file and upload; the temp file is removed on every
	// exit path when the handle drops.
	let temp = tokio::task::spawn_blocking(move || -> anyhow::Result<tempfile::NamedTempFile> {
		let bytes = encode_jpeg(&img, 80)?;
		let mut temp = tempfile::NamedTempFile::new()?;
		temp.write_all(&bytes)?;
		temp.flush()?;
		Ok(temp)
	})
	.await
	.map_err(|err| anyhow::Error::from(err).context("2d encoder worker panicked"))??;

	state.store.put_file(temp.path(), &key, "image/jpeg").await?;

	Ok(
		Json(json!({
			"status": "generated",
			"client": payload.client,
			"scene": payload.scene,
			"build": build,
			"url": state.store.public_url(&key)?,
		}))
		.into_response(),
	)
}

/// `GET /api/health`: liveness and identity.
pub async fn health() -> Response {
	Json(json!({
		"status": "ok",
		"service": "panotiles",
		"version": env!("CARGO_PKG_VERSION"),
	}))
	.into_response()
}

/// Legacy tile path: tiles used to be served from the local cache prefix;
/// they now live in the object store, so answer with a permanent redirect.
pub async fn legacy_tile(
	State(state): State<SharedState>,
	Path((client, scene, build, filename)): Path<(String, String, String, String)>,
) -> Result<Response, ApiError> {
	validate_safe_id(&client, "client")?;
	validate_safe_id(&scene, "scene")?;
	validate_build_string(&build)?;
	if !TILE_FILE_RE.is_match(&filename) {
		return Err(ApiError::bad_request("invalid tile filename"));
	}
	if !filename.starts_with(&format!("{build}_")) {
		return Err(ApiError::bad_request("tile does not belong to this build"));
	}

	let url = state
		.store
		.public_url(&format!("{}/{filename}", tile_root(&client, &scene, &build)))?;

	Ok(
		Response::builder()
			.status(StatusCode::MOVED_PERMANENTLY)
			.header(header::LOCATION, url.as_str())
			.body(axum::body::Body::empty())
			.expect("failed to build redirect response"),
	)
}
