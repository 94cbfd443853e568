//! Storage backend selection.

use crate::local::LocalStore;
use crate::r2::{R2Config, R2Store};
use crate::traits::ObjectStore;
use anyhow::{Result, anyhow, bail};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Which blob store the service publishes to. R2 is the production default;
/// the local backend exists for staging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorageBackend {
	#[default]
	R2,
	Local,
}

impl FromStr for StorageBackend {
	type Err = anyhow::Error;

	fn from_str(value: &str) -> Result<Self> {
		match value {
			"r2" => Ok(StorageBackend::R2),
			"local" => Ok(StorageBackend::Local),
			other => bail!("invalid STORAGE_BACKEND '{other}', expected 'r2' or 'local'"),
		}
	}
}

/// Everything needed to construct the configured backend.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
	pub backend: StorageBackend,
	pub public_url_base: Option<String>,
	/// Root directory of the local backend (and of the asset cache).
	pub local_root: PathBuf,
	pub r2: Option<R2Config>,
}

pub fn build_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
	match config.backend {
		StorageBackend::Local => Ok(Arc::new(LocalStore::new(
			config.local_root.clone(),
			config.public_url_base.clone(),
		))),
		StorageBackend::R2 => {
			let r2 = config.r2.as_ref().ok_or_else(|| {
				anyhow!("R2 backend selected but credentials are missing; set R2_ACCESS_KEY_ID, R2_SECRET_ACCESS_KEY and R2_ENDPOINT_URL")
			})?;
			Ok(Arc::new(R2Store::new(r2, config.public_url_base.clone())))
		}
	}
}
