//! Service configuration, read from environment variables.
//!
//! All knobs have defaults suitable for production behind R2; the local
//! backend is opted into with `STORAGE_BACKEND=local`. An unknown backend
//! value is a fatal startup error.

use anyhow::{Context, Result};
use panotiles_derive::context;
use panotiles_store::{R2Config, StorageBackend, StorageConfig};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default root of the local asset cache (and of the local store backend).
pub const DEFAULT_CACHE_ROOT: &str = "panotiles_cache";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
	pub ip: String,
	pub port: u16,
	pub storage_backend: StorageBackend,
	/// Base URL clients fetch tiles from. Required for any API response that
	/// carries URLs; never defaulted to avoid baking a bucket into the build.
	pub public_url_base: Option<String>,
	/// Exact-match CORS origins. Empty means no cross-origin access.
	pub cors_origins: Vec<String>,
	/// Upload worker bound for `put_tiles_parallel`.
	pub tile_workers: usize,
	/// Face worker bound for the splitter; `None` lets the splitter pick
	/// from the CPU count. Always clamped to `[1, 6]`.
	pub face_workers: Option<usize>,
	/// Global rate-limit window between accepted render requests.
	pub min_interval: Duration,
	/// Capacity of the per-build render-lock LRU.
	pub max_render_locks: usize,
	/// Bound on concurrently active render pipelines; `None` is unbounded.
	pub render_capacity: Option<usize>,
	pub jpeg_quality: u8,
	pub cache_root: PathBuf,
	pub r2: Option<R2Config>,
}

impl Default for ServiceConfig {
	fn default() -> Self {
		Self {
			ip: "0.0.0.0".to_string(),
			port: 8080,
			storage_backend: StorageBackend::default(),
			public_url_base: None,
			cors_origins: Vec::new(),
			tile_workers: 4,
			face_workers: None,
			min_interval: Duration::from_secs_f64(1.0),
			max_render_locks: 256,
			render_capacity: None,
			jpeg_quality: 85,
			cache_root: PathBuf::from(DEFAULT_CACHE_ROOT),
			r2: None,
		}
	}
}

impl ServiceConfig {
	/// Reads configuration from the process environment.
	#[context("reading service configuration from the environment")]
	pub fn from_env() -> Result<Self> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Reads configuration through an injectable lookup, so tests don't have
	/// to mutate the process environment.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
		fn parse<T: FromStr>(value: &str, name: &str) -> Result<T>
		where
			T::Err: std::error::Error + Send + Sync + 'static,
		{
			value.parse().with_context(|| format!("invalid {name} '{value}'"))
		}

		let mut config = Self::default();

		if let Some(value) = lookup("STORAGE_BACKEND") {
			config.storage_backend = value.parse()?;
		}
		config.public_url_base = lookup("PUBLIC_URL_BASE").filter(|value| !value.is_empty());
		if let Some(value) = lookup("CORS_ORIGINS") {
			config.cors_origins = value
				.split(',')
				.map(str::trim)
				.filter(|origin| !origin.is_empty())
				.map(String::from)
				.collect();
		}
		if let Some(value) = lookup("TILE_WORKERS") {
			config.tile_workers = parse(&value, "TILE_WORKERS")?;
		}
		if let Some(value) = lookup("FACE_WORKERS") {
			config.face_workers = Some(parse(&value, "FACE_WORKERS")?);
		}
		if let Some(value) = lookup("MIN_INTERVAL") {
			config.min_interval = Duration::from_secs_f64(parse(&value, "MIN_INTERVAL")?);
		}
		if let Some(value) = lookup("MAX_RENDER_LOCKS") {
			config.max_render_locks = parse(&value, "MAX_RENDER_LOCKS")?;
		}
		if let Some(value) = lookup("RENDER_CAPACITY") {
			config.render_capacity = Some(parse(&value, "RENDER_CAPACITY")?);
		}
		if let Some(value) = lookup("JPEG_QUALITY") {
			config.jpeg_quality = parse(&value, "JPEG_QUALITY")?;
		}
		if let Some(value) = lookup("CACHE_ROOT") {
			config.cache_root = PathBuf::from(value);
		}

		let access_key_id = lookup("R2_ACCESS_KEY_ID");
		let secret_access_key = lookup("R2_SECRET_ACCESS_KEY");
		if let (Some(access_key_id), Some(secret_access_key)) = (access_key_id, secret_access_key) {
			let endpoint_url = lookup("R2_ENDPOINT_URL")
				.or_else(|| lookup("R2_ACCOUNT_ID").map(|id| format!("https://{id}.r2.cloudflarestorage.com")))
				.context("set R2_ENDPOINT_URL or R2_ACCOUNT_ID")?;
			config.r2 = Some(R2Config {
				access_key_id,
				secret_access_key,
				bucket: lookup("R2_BUCKET_NAME").unwrap_or_else(|| "panotiles-tiles".to_string()),
				endpoint_url,
			});
		}

		Ok(config)
	}

	/// The storage slice of the configuration.
	pub fn storage(&self) -> StorageConfig {
		StorageConfig {
			backend: self.storage_backend,
			public_url_base: self.public_url_base.clone(),
			local_root: self.cache_root.clone(),
			r2: self.r2.clone(),
		}
	}
}
