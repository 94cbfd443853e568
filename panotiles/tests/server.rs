//! End-to-end scenarios against a running server with the local storage
//! backend: cold render, warm cache, rate limiting, input validation, status
//! progression, event log paging and the legacy tile redirect.

use panotiles::config::ServiceConfig;
use panotiles::server::{AppState, RenderServer};
use panotiles_image::{DynamicImage, ImageBuffer, Rgb};
use panotiles_store::{LocalStore, ObjectStore};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const PUBLIC_URL_BASE: &str = "https://cdn.test";
const FACE_SIZE: u32 = 128;

struct TestService {
	/// Keeps the scratch tree alive for the duration of the test.
	_dir: tempfile::TempDir,
	server: RenderServer,
	cache_root: PathBuf,
	base_url: String,
	store: Arc<LocalStore>,
}

impl TestService {
	fn url(&self, path: &str) -> String {
		format!("{}{path}", self.base_url)
	}

	async fn stop(mut self) {
		self.server.stop().await;
	}
}

fn write_png(path: &Path, width: u32, height: u32, color: [u8; 3]) {
	std::fs::create_dir_all(path.parent().unwrap()).unwrap();
	DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb(color)))
		.save(path)
		.unwrap();
}

fn client_config() -> Value {
	json!({
		"scenes": {
			"kitchen": {
				"scene_index": 0,
				"layers": [
					{
						"id": "floor",
						"build_order": 0,
						"mask": "floor",
						"items": [{"id": "marble", "index": 1, "file": "marble"}]
					},
					{
						"id": "walls",
						"build_order": 1,
						"mask": "walls",
						"items": [{"id": "white", "index": 2, "file": "white"}]
					}
				]
			},
			"garage": {"scene_index": 1, "layers": []}
		}
	})
}

async fn start_service(min_interval_secs: f64) -> TestService {
	let dir = tempfile::tempdir().unwrap();
	let cache_root = dir.path().join("panotiles_cache");

	// Scene assets: a 6-face strip base plus one fully-masked material. The
	// "walls" layer's assets are deliberately absent to exercise the
	// skip-on-missing path.
	let scene_root = cache_root.join("clients/acme/scenes/kitchen");
	write_png(&scene_root.join("base_kitchen.png"), FACE_SIZE * 6, FACE_SIZE, [40, 80, 120]);
	write_png(&scene_root.join("materials/marble.png"), FACE_SIZE * 6, FACE_SIZE, [200, 190, 180]);
	write_png(&scene_root.join("masks/floor.png"), FACE_SIZE * 6, FACE_SIZE, [255, 255, 255]);

	// 2D variants for the flat renderer.
	write_png(&scene_root.join("2d_base_kitchen.png"), 96, 48, [10, 20, 30]);
	write_png(&scene_root.join("materials/2d_marble.png"), 96, 48, [210, 200, 190]);
	write_png(&scene_root.join("masks/2d_floor.png"), 96, 48, [255, 255, 255]);

	let store = Arc::new(LocalStore::new(&cache_root, Some(PUBLIC_URL_BASE.to_string())));
	store
		.put_json("clients/acme/acme_cfg.json", &client_config())
		.await
		.unwrap();

	let config = ServiceConfig {
		ip: "127.0.0.1".to_string(),
		port: 0,
		public_url_base: Some(PUBLIC_URL_BASE.to_string()),
		cache_root: cache_root.clone(),
		min_interval: Duration::from_secs_f64(min_interval_secs),
		tile_workers: 4,
		face_workers: Some(2),
		jpeg_quality: 70,
		..ServiceConfig::default()
	};

	let state = AppState::new(config, Arc::clone(&store) as Arc<dyn ObjectStore>).unwrap();
	let mut server = RenderServer::new(state);
	server.start().await.unwrap();
	let base_url = format!("http://127.0.0.1:{}", server.port());

	TestService {
		_dir: dir,
		server,
		cache_root,
		base_url,
		store,
	}
}

async fn post_render(service: &TestService, body: &Value) -> (u16, Value) {
	let response = reqwest::Client::new()
		.post(service.url("/api/render"))
		.json(body)
		.send()
		.await
		.unwrap();
	let status = response.status().as_u16();
	(status, response.json().await.unwrap())
}

fn render_payload() -> Value {
	json!({
		"client": "acme",
		"scene": "kitchen",
		"selection": {"floor": "marble", "walls": "white"}
	})
}

async fn get_status(service: &TestService, build: &str) -> Value {
	reqwest::get(service.url(&format!("/api/status/{build}?client=acme&scene=kitchen")))
		.await
		.unwrap()
		.json()
		.await
		.unwrap()
}

async fn wait_until_completed(service: &TestService, build: &str) -> Value {
	for _ in 0..300 {
		let status = get_status(service, build).await;
		match status["status"].as_str() {
			Some("completed") => return status,
			Some("error") => panic!("render failed: {status}"),
			_ => tokio::time::sleep(Duration::from_millis(100)).await,
		}
	}
	panic!("render for build {build} did not complete in time");
}

fn count_tiles(service: &TestService, build: &str) -> usize {
	let tile_dir = service
		.cache_root
		.join(format!("clients/acme/cubemap/kitchen/tiles/{build}"));
	std::fs::read_dir(tile_dir)
		.unwrap()
		.filter_map(|entry| entry.ok())
		.filter(|entry| entry.path().extension().is_some_and(|ext| ext == "jpg"))
		.count()
}

#[tokio::test]
async fn cold_render_then_warm_cache() {
	let service = start_service(0.0).await;

	// --- Cold request: admitted and processed in the background ---
	let (status, body) = post_render(&service, &render_payload()).await;
	assert_eq!(status, 202);
	assert_eq!(body["status"], "processing");
	let build = body["tiles"]["build"].as_str().unwrap().to_string();
	assert_eq!(build, "000102000000");
	assert_eq!(body["build"], build);
	assert_eq!(
		body["tiles"]["tileRoot"],
		format!("clients/acme/cubemap/kitchen/tiles/{build}")
	);
	assert_eq!(body["tiles"]["pattern"], format!("{build}_{{f}}_{{z}}_{{x}}_{{y}}.jpg"));

	let final_status = wait_until_completed(&service, &build).await;
	assert_eq!(final_status["lod_ready"], 1);
	assert_eq!(final_status["progress"], 1.0);

	// Published artifacts: ready metadata plus the full 120-tile pyramid.
	let metadata_key = format!("clients/acme/cubemap/kitchen/tiles/{build}/metadata.json");
	assert!(service.store.exists(&metadata_key).await.unwrap());
	let metadata = service.store.get_json(&metadata_key).await.unwrap();
	assert_eq!(metadata["status"], "ready");
	assert_eq!(metadata["tiles_count"], 120);
	assert_eq!(count_tiles(&service, &build), 120);

	// --- Warm request: pure cache hit ---
	let (status, body) = post_render(&service, &render_payload()).await;
	assert_eq!(status, 200);
	assert_eq!(body["status"], "cached");
	assert_eq!(body["build"], build);
	assert_eq!(count_tiles(&service, &build), 120);

	// No response leaks local paths; tile URLs are absolute.
	let body_text = body.to_string();
	assert!(!body_text.contains("panotiles_cache"));
	assert!(!body_text.contains(service.cache_root.to_str().unwrap()));
	assert!(body["tiles"]["baseUrl"].as_str().unwrap().starts_with("http"));

	service.stop().await;
}

#[tokio::test]
async fn concurrent_duplicates_run_one_pipeline() {
	let service = start_service(0.0).await;
	let payload = render_payload();

	let (a, b) = tokio::join!(post_render(&service, &payload), post_render(&service, &payload));
	for (status, body) in [&a, &b] {
		assert!(*status == 200 || *status == 202, "unexpected status {status}: {body}");
		let state = body["status"].as_str().unwrap();
		assert!(state == "processing" || state == "cached", "unexpected state {state}");
	}

	let build = a.1["build"].as_str().unwrap();
	wait_until_completed(&service, build).await;
	assert_eq!(count_tiles(&service, build), 120);

	let tile_dir = service
		.cache_root
		.join(format!("clients/acme/cubemap/kitchen/tiles/{build}"));
	let metadata_files = std::fs::read_dir(&tile_dir)
		.unwrap()
		.filter_map(|entry| entry.ok())
		.filter(|entry| entry.file_name() == "metadata.json")
		.count();
	assert_eq!(metadata_files, 1);

	service.stop().await;
}

#[tokio::test]
async fn rate_limit_rejects_rapid_requests() {
	let service = start_service(60.0).await;

	// Unknown client keeps the pipeline out of the picture; the rate limit
	// is checked before anything else.
	let payload = json!({"client": "ghost", "scene": "kitchen", "selection": {}});
	let (first, _) = post_render(&service, &payload).await;
	tokio::time::sleep(Duration::from_millis(10)).await;
	let (second, body) = post_render(&service, &payload).await;

	assert_eq!(first, 404);
	assert_eq!(second, 429);
	assert_eq!(body["kind"], "too-many-requests");

	service.stop().await;
}

#[tokio::test]
async fn path_traversal_client_is_rejected() {
	let service = start_service(0.0).await;

	let payload = json!({"client": "../etc", "scene": "kitchen", "selection": {}});
	let (status, body) = post_render(&service, &payload).await;
	assert_eq!(status, 400);
	assert_eq!(body["kind"], "invalid-input");

	service.stop().await;
}

#[tokio::test]
async fn status_reports_upload_progress_and_idle() {
	let service = start_service(0.0).await;

	// Unknown build: idle, nothing else.
	let status = get_status(&service, "ab0000000000").await;
	assert_eq!(status, json!({"status": "idle"}));

	// Malformed build: idle as well.
	let malformed: Value = reqwest::get(service.url("/api/status/not-a-build"))
		.await
		.unwrap()
		.json()
		.await
		.unwrap();
	assert_eq!(malformed, json!({"status": "idle"}));

	// Mid-upload progress straight from the registry.
	use panotiles::core::{BuildState, StatusPatch};
	service.server.state().registry.set_status(
		"ab0000000000",
		BuildState::Uploading,
		StatusPatch {
			tiles_uploaded: Some(12),
			tiles_total: Some(48),
			progress: Some(0.25),
			faces_ready: Some(true),
			tiles_ready: Some(true),
			lod_ready: Some(0),
			..Default::default()
		},
	);

	let status = get_status(&service, "ab0000000000").await;
	assert_eq!(status["status"], "uploading");
	assert_eq!(status["tiles_uploaded"], 12);
	assert_eq!(status["tiles_total"], 48);
	assert_eq!(status["progress"], 0.25);
	assert_eq!(status["percent_complete"], 0.25);
	assert_eq!(status["faces_ready"], true);
	assert_eq!(status["lod_ready"], 0);
	assert_eq!(status["build"], "ab0000000000");
	assert_eq!(
		status["tiles"]["tileRoot"],
		"clients/acme/cubemap/kitchen/tiles/ab0000000000"
	);

	service.stop().await;
}

#[tokio::test]
async fn metadata_drives_completion_only_with_tiles() {
	let service = start_service(0.0).await;

	// Ready metadata with tiles published: completed.
	service
		.store
		.put_json(
			"clients/acme/cubemap/kitchen/tiles/cd0000000000/metadata.json",
			&json!({"status": "ready", "tiles_count": 48}),
		)
		.await
		.unwrap();
	let status = get_status(&service, "cd0000000000").await;
	assert_eq!(status["status"], "completed");
	assert_eq!(status["tiles_uploaded"], 48);
	assert_eq!(status["tiles_total"], 48);

	// Ready metadata without tiles: must not read as completed.
	service
		.store
		.put_json(
			"clients/acme/cubemap/kitchen/tiles/ef0000000000/metadata.json",
			&json!({"status": "ready", "tiles_count": 0}),
		)
		.await
		.unwrap();
	let status = get_status(&service, "ef0000000000").await;
	assert_ne!(status["status"], "completed");

	service.stop().await;
}

#[tokio::test]
async fn event_log_slices_page_through_the_upload() {
	let service = start_service(0.0).await;

	let (_, body) = post_render(&service, &render_payload()).await;
	let build = body["build"].as_str().unwrap().to_string();
	wait_until_completed(&service, &build).await;

	let tile_root = format!("clients/acme/cubemap/kitchen/tiles/{build}");
	let events_url = |cursor: usize, limit: usize| {
		service.url(&format!(
			"/api/render/events?tile_root={tile_root}&cursor={cursor}&limit={limit}"
		))
	};

	// The appender drains asynchronously; wait for the terminal record.
	let mut total = 0;
	for _ in 0..100 {
		let page: Value = reqwest::get(events_url(0, 500)).await.unwrap().json().await.unwrap();
		total = page["data"]["events"].as_array().unwrap().len();
		if page["data"]["completed"] == true {
			break;
		}
		tokio::time::sleep(Duration::from_millis(100)).await;
	}
	// 24 + 96 per-tile records plus the terminal one.
	assert_eq!(total, 121);

	// Page through with a small limit.
	let page: Value = reqwest::get(events_url(0, 50)).await.unwrap().json().await.unwrap();
	assert_eq!(page["status"], "ok");
	let data = &page["data"];
	assert_eq!(data["events"].as_array().unwrap().len(), 50);
	assert_eq!(data["cursor"], 50);
	assert_eq!(data["hasMore"], true);
	assert_eq!(data["completed"], false);

	let page: Value = reqwest::get(events_url(50, 500)).await.unwrap().json().await.unwrap();
	let data = &page["data"];
	assert_eq!(data["events"].as_array().unwrap().len(), 71);
	assert_eq!(data["cursor"], 121);
	assert_eq!(data["hasMore"], false);
	assert_eq!(data["completed"], true);

	// Past EOF.
	let page: Value = reqwest::get(events_url(500, 10)).await.unwrap().json().await.unwrap();
	assert_eq!(page["data"]["events"].as_array().unwrap().len(), 0);
	assert_eq!(page["data"]["cursor"], 500);

	// Invalid tile_root is rejected.
	let response = reqwest::get(service.url("/api/render/events?tile_root=../etc&cursor=0&limit=10"))
		.await
		.unwrap();
	assert_eq!(response.status().as_u16(), 400);

	service.stop().await;
}

#[tokio::test]
async fn legacy_tile_path_redirects_to_the_public_url() {
	let service = start_service(0.0).await;
	let client = reqwest::Client::builder()
		.redirect(reqwest::redirect::Policy::none())
		.build()
		.unwrap();

	let build = "000102000000";
	let tile = format!("{build}_f_0_0_0.jpg");
	let response = client
		.get(service.url(&format!("/panotiles_cache/cubemap/acme/kitchen/tiles/{build}/{tile}")))
		.send()
		.await
		.unwrap();

	assert_eq!(response.status().as_u16(), 301);
	let location = response.headers()["location"].to_str().unwrap();
	assert_eq!(
		location,
		format!("{PUBLIC_URL_BASE}/clients/acme/cubemap/kitchen/tiles/{build}/{tile}")
	);
	assert!(!location.contains("panotiles_cache"));

	// A tile of a different build is refused.
	let response = client
		.get(service.url(&format!(
			"/panotiles_cache/cubemap/acme/kitchen/tiles/{build}/zz0000000000_f_0_0_0.jpg"
		)))
		.send()
		.await
		.unwrap();
	assert_eq!(response.status().as_u16(), 400);

	service.stop().await;
}

#[tokio::test]
async fn render2d_generates_then_caches_a_single_image() {
	let service = start_service(0.0).await;
	let client = reqwest::Client::new();

	let response = client
		.post(service.url("/api/render2d"))
		.json(&render_payload())
		.send()
		.await
		.unwrap();
	assert_eq!(response.status().as_u16(), 200);
	let body: Value = response.json().await.unwrap();
	assert_eq!(body["status"], "generated");
	let url = body["url"].as_str().unwrap();
	assert!(url.starts_with(PUBLIC_URL_BASE));

	let build = body["build"].as_str().unwrap();
	let key = format!("clients/acme/renders/kitchen/2d_{build}.jpg");
	assert!(service.store.exists(&key).await.unwrap());

	// Identical request hits the cached image.
	let body: Value = client
		.post(service.url("/api/render2d"))
		.json(&render_payload())
		.send()
		.await
		.unwrap()
		.json()
		.await
		.unwrap();
	assert_eq!(body["status"], "cached");

	service.stop().await;
}

#[tokio::test]
async fn render2d_without_base_asset_is_404() {
	let service = start_service(0.0).await;

	let response = reqwest::Client::new()
		.post(service.url("/api/render2d"))
		.json(&json!({"client": "acme", "scene": "garage", "selection": {}}))
		.send()
		.await
		.unwrap();

	assert_eq!(response.status().as_u16(), 404);
	let body: Value = response.json().await.unwrap();
	assert_eq!(body["kind"], "asset-missing");

	// Nothing was published for the scene.
	assert!(
		!service
			.cache_root
			.join("clients/acme/renders/garage")
			.exists()
	);

	service.stop().await;
}

#[tokio::test]
async fn failed_background_render_surfaces_via_status() {
	let service = start_service(0.0).await;

	// The garage scene has no base asset, so the pipeline fails after admission.
	let (status, body) = post_render(
		&service,
		&json!({"client": "acme", "scene": "garage", "selection": {}}),
	)
	.await;
	assert_eq!(status, 202);
	let build = body["build"].as_str().unwrap().to_string();

	let mut last = Value::Null;
	for _ in 0..100 {
		last = reqwest::get(service.url(&format!("/api/status/{build}?client=acme&scene=garage")))
			.await
			.unwrap()
			.json()
			.await
			.unwrap();
		if last["status"] == "error" {
			break;
		}
		tokio::time::sleep(Duration::from_millis(50)).await;
	}
	assert_eq!(last["status"], "error");
	assert!(last["error"].as_str().unwrap().contains("asset"));

	service.stop().await;
}
