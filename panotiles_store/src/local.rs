//! Local-filesystem backend, used for staging and tests.
//!
//! Keys are resolved below a root directory that doubles as the asset cache,
//! so a locally "uploaded" tile is immediately servable by a dev web server
//! pointed at the same tree.

use crate::traits::{ObjectStore, slice_jsonl};
use anyhow::{Context, Result, anyhow};
use panotiles_core::ServiceError;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub struct LocalStore {
	root: PathBuf,
	public_url_base: Option<String>,
	append_lock: Mutex<()>,
}

impl LocalStore {
	pub fn new(root: impl Into<PathBuf>, public_url_base: Option<String>) -> Self {
		let root = root.into();
		log::info!("using local storage backend at {:?} (staging only)", root);
		Self {
			root,
			public_url_base,
			append_lock: Mutex::new(()),
		}
	}

	fn resolve(&self, key: &str) -> PathBuf {
		self.root.join(key)
	}

	async fn ensure_parent(path: &Path) -> Result<()> {
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		Ok(())
	}
}

#[async_trait::async_trait]
impl ObjectStore for LocalStore {
	async fn exists(&self, key: &str) -> Result<bool> {
		Ok(tokio::fs::try_exists(self.resolve(key)).await?)
	}

	async fn put_file(&self, src: &Path, key: &str, content_type: &str) -> Result<()> {
		// content_type is kept for interface parity; the filesystem has no header to set.
		let _ = content_type;
		let dest = self.resolve(key);
		Self::ensure_parent(&dest).await?;
		tokio::fs::copy(src, &dest).await?;
		log::debug!("cached locally: {key}");
		Ok(())
	}

	async fn put_bytes(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
		let _ = content_type;
		let dest = self.resolve(key);
		Self::ensure_parent(&dest).await?;
		tokio::fs::write(&dest, bytes).await?;
		Ok(())
	}

	async fn get_json(&self, key: &str) -> Result<Value> {
		let path = self.resolve(key);
		let content = match tokio::fs::read_to_string(&path).await {
			Ok(content) => content,
			Err(err) if err.kind() == ErrorKind::NotFound => {
				return Err(ServiceError::NotFound(format!("JSON not found in local store: {key}")).into());
			}
			Err(err) => return Err(anyhow!(err).context(format!("reading JSON '{key}'"))),
		};
		serde_json::from_str(&content).with_context(|| format!("parsing JSON '{key}'"))
	}

	async fn put_json(&self, key: &str, value: &Value) -> Result<()> {
		self.put_bytes(key, serde_json::to_vec(value)?, "application/json").await
	}

	async fn append_jsonl(&self, key: &str, value: &Value) -> Result<()> {
		let path = self.resolve(key);
		Self::ensure_parent(&path).await?;

		let mut line = serde_json::to_string(value)?;
		line.push('\n');

		let _guard = self.append_lock.lock().await;
		let mut file = tokio::fs::OpenOptions::new()
			.create(true)
			.append(true)
			.open(&path)
			.await?;
		file.write_all(line.as_bytes()).await?;
		file.flush().await?;
		Ok(())
	}

	async fn read_jsonl_slice(&self, key: &str, cursor: usize, limit: usize) -> Result<(Vec<Value>, usize)> {
		let path = self.resolve(key);
		let content = match tokio::fs::read_to_string(&path).await {
			Ok(content) => content,
			Err(err) if err.kind() == ErrorKind::NotFound => return Ok((Vec::new(), cursor)),
			Err(err) => return Err(anyhow!(err).context(format!("reading NDJSON '{key}'"))),
		};
		Ok(slice_jsonl(&content, key, cursor, limit))
	}

	async fn download_file(&self, key: &str, dest: &Path) -> Result<()> {
		let src = self.resolve(key);
		if !tokio::fs::try_exists(&src).await? {
			return Err(ServiceError::NotFound(format!("object not found in local store: {key}")).into());
		}
		Self::ensure_parent(dest).await?;
		tokio::fs::copy(&src, dest).await?;
		Ok(())
	}

	fn public_url(&self, key: &str) -> Result<String> {
		let base = self
			.public_url_base
			.as_deref()
			.ok_or_else(|| anyhow!("PUBLIC_URL_BASE is not configured; refusing to expose local paths"))?;
		Ok(format!("{}/{key}", base.trim_end_matches('/')))
	}
}
