//! Cross-request coordination state.
//!
//! Everything shared between requests lives in this one injectable value:
//! the rate-limiter timestamp, the per-build single-flight locks, the set of
//! active background renders, the build-status registry and the capacity
//! semaphore. Each piece is guarded by its own small mutex; nothing here is
//! a process-global.

use crate::config::ServiceConfig;
use anyhow::{Result, anyhow};
use lru::LruCache;
use panotiles_core::{ServiceError, StatusRegistry, TileManifest};
use panotiles_store::{AssetResolver, ObjectStore};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

pub type SharedState = Arc<AppState>;

pub struct AppState {
	pub config: ServiceConfig,
	pub store: Arc<dyn ObjectStore>,
	pub resolver: AssetResolver,
	pub registry: StatusRegistry,
	/// Monotonic timestamp of the last accepted render request.
	last_request: Mutex<Option<Instant>>,
	/// Bounded LRU of per-build admission locks. Evicting a lock is harmless:
	/// single-flight over a running pipeline is enforced by `active_renders`.
	render_locks: Mutex<LruCache<String, Arc<tokio::sync::Mutex<()>>>>,
	/// Render keys with a pipeline currently in flight.
	active_renders: Mutex<HashSet<String>>,
	/// Optional bound on concurrently active pipelines.
	pub capacity: Option<Arc<Semaphore>>,
}

impl AppState {
	pub fn new(config: ServiceConfig, store: Arc<dyn ObjectStore>) -> Result<SharedState> {
		let resolver = AssetResolver::new(&config.cache_root, config.public_url_base.clone())?;
		let lock_capacity = NonZeroUsize::new(config.max_render_locks.max(1)).unwrap();
		let capacity = config.render_capacity.map(|slots| Arc::new(Semaphore::new(slots)));

		Ok(Arc::new(Self {
			resolver,
			registry: StatusRegistry::new(),
			last_request: Mutex::new(None),
			render_locks: Mutex::new(LruCache::new(lock_capacity)),
			active_renders: Mutex::new(HashSet::new()),
			capacity,
			config,
			store,
		}))
	}

	/// Global rate limit: rejects when less than `min_interval` has elapsed
	/// since the last accepted request.
	pub fn check_rate_limit(&self) -> Result<()> {
		let mut last = self.last_request.lock();
		let now = Instant::now();
		if let Some(previous) = *last {
			if now.duration_since(previous) < self.config.min_interval {
				return Err(ServiceError::TooManyRequests("too many requests, wait a moment".to_string()).into());
			}
		}
		*last = Some(now);
		Ok(())
	}

	/// The admission lock of one render key.
	pub fn render_lock(&self, render_key: &str) -> Arc<tokio::sync::Mutex<()>> {
		let mut locks = self.render_locks.lock();
		locks
			.get_or_insert(render_key.to_string(), || Arc::new(tokio::sync::Mutex::new(())))
			.clone()
	}

	/// Marks a render as in flight. Returns false when it already is.
	pub fn begin_render(&self, render_key: &str) -> bool {
		self.active_renders.lock().insert(render_key.to_string())
	}

	pub fn finish_render(&self, render_key: &str) {
		self.active_renders.lock().remove(render_key);
	}

	pub fn is_render_active(&self, render_key: &str) -> bool {
		self.active_renders.lock().contains(render_key)
	}

	/// The manifest clients expand into tile URLs.
	pub fn manifest(&self, tile_root: &str, build: &str) -> Result<TileManifest> {
		let base_url = self
			.config
			.public_url_base
			.as_deref()
			.ok_or_else(|| anyhow!("PUBLIC_URL_BASE is not configured"))?;
		Ok(TileManifest::new(base_url, tile_root, build))
	}
}
