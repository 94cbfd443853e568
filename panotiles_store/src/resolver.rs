//! Asset resolution: local cache first, remote object store as fallback.
//!
//! Assets are addressed by a *base path* without extension. The resolver
//! probes `.png`, `.jpg`, `.jpeg` in that order on the local filesystem and,
//! when nothing matches, tries a streamed download of each candidate from the
//! public bucket URL, caching the body at the local candidate path.

use anyhow::{Context, Result};
use futures::StreamExt;
use panotiles_core::ServiceError;
use panotiles_derive::context;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const SUPPORTED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct AssetResolver {
	/// Local cache root; stripped from candidate paths to form remote keys.
	cache_root: PathBuf,
	public_url_base: Option<String>,
	http: reqwest::Client,
}

impl AssetResolver {
	pub fn new(cache_root: impl Into<PathBuf>, public_url_base: Option<String>) -> Result<Self> {
		let http = reqwest::Client::builder()
			.timeout(FETCH_TIMEOUT)
			.build()
			.context("building asset fetch client")?;
		Ok(Self {
			cache_root: cache_root.into(),
			public_url_base,
			http,
		})
	}

	/// Resolves `base_path` (no extension) to a local file, downloading and
	/// caching it when only the remote copy exists.
	#[context("resolving asset '{}'", base_path.display())]
	pub async fn resolve(&self, base_path: &Path) -> Result<PathBuf> {
		for ext in SUPPORTED_EXTENSIONS {
			let candidate = base_path.with_extension(ext);
			if tokio::fs::try_exists(&candidate).await? {
				return Ok(candidate);
			}
		}

		let mut last_url = String::from("<no remote base configured>");
		if let Some(base_url) = self.public_url_base.as_deref() {
			log::info!("asset not found locally, attempting remote download: {base_path:?}");

			for ext in SUPPORTED_EXTENSIONS {
				let candidate = base_path.with_extension(ext);
				let key = candidate
					.strip_prefix(&self.cache_root)
					.unwrap_or(candidate.as_path())
					.to_string_lossy()
					.into_owned();
				let url = format!("{}/{key}", base_url.trim_end_matches('/'));
				last_url = url.clone();

				match self.http.get(&url).send().await {
					Ok(response) if response.status() == StatusCode::OK => {
						self.stream_to_file(response, &candidate).await?;
						log::info!("downloaded and cached: {candidate:?}");
						return Ok(candidate);
					}
					Ok(response) if response.status() == StatusCode::NOT_FOUND => {
						log::debug!("asset not found at {url}");
					}
					Ok(response) => {
						log::warn!("unexpected status {} for {url}", response.status());
					}
					Err(err) => {
						log::warn!("failed to download {url}: {err}");
					}
				}
			}
		}

		Err(
			ServiceError::AssetMissing(format!(
				"asset not found for base '{}' (last remote attempt: {last_url})",
				base_path.display()
			))
			.into(),
		)
	}

	async fn stream_to_file(&self, response: reqwest::Response, dest: &Path) -> Result<()> {
		if let Some(parent) = dest.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		let mut file = tokio::fs::File::create(dest)
			.await
			.with_context(|| format!("creating {dest:?}"))?;
		let mut stream = response.bytes_stream();
		while let Some(chunk) = stream.next().await {
			file.write_all(&chunk?).await?;
		}
		file.flush().await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::Router;
	use axum::http::StatusCode;
	use axum::routing::get;
	use panotiles_core::service_error;

	async fn spawn_asset_server(png_body: &'static [u8]) -> String {
		let app = Router::new()
			.route(
				"/clients/acme/scenes/kitchen/base_kitchen.png",
				get(move || async move { png_body.to_vec() }),
			)
			.fallback(get(|| async { (StatusCode::NOT_FOUND, "Not Found") }));
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, app).await.unwrap();
		});
		format!("http://{addr}")
	}

	#[tokio::test]
	async fn prefers_existing_local_file_in_extension_order() {
		let dir = tempfile::tempdir().unwrap();
		let base = dir.path().join("base_kitchen");
		std::fs::write(base.with_extension("jpg"), b"jpg").unwrap();
		std::fs::write(base.with_extension("png"), b"png").unwrap();

		let resolver = AssetResolver::new(dir.path(), None).unwrap();
		let resolved = resolver.resolve(&base).await.unwrap();
		assert_eq!(resolved.extension().unwrap(), "png");
	}

	#[tokio::test]
	async fn downloads_and_caches_remote_asset() {
		static BODY: &[u8] = b"fake-png-bytes";
		let base_url = spawn_asset_server(BODY).await;

		let dir = tempfile::tempdir().unwrap();
		let base = dir.path().join("clients/acme/scenes/kitchen/base_kitchen");

		let resolver = AssetResolver::new(dir.path(), Some(base_url)).unwrap();
		let resolved = resolver.resolve(&base).await.unwrap();

		assert_eq!(resolved, base.with_extension("png"));
		assert_eq!(std::fs::read(&resolved).unwrap(), BODY);

		// Second resolution hits the cached copy.
		let again = resolver.resolve(&base).await.unwrap();
		assert_eq!(again, resolved);
	}

	#[tokio::test]
	async fn missing_everywhere_is_asset_missing_with_attempted_url() {
		let base_url = spawn_asset_server(b"").await;

		let dir = tempfile::tempdir().unwrap();
		let base = dir.path().join("clients/acme/scenes/kitchen/base_garage");

		let resolver = AssetResolver::new(dir.path(), Some(base_url.clone())).unwrap();
		let err = resolver.resolve(&base).await.unwrap_err();

		assert_eq!(service_error(&err).unwrap().kind(), "asset-missing");
		let message = format!("{err:#}");
		assert!(message.contains("base_garage"), "missing local base in: {message}");
		assert!(message.contains(&base_url), "missing remote URL in: {message}");
	}

	#[tokio::test]
	async fn no_remote_base_fails_locally() {
		let dir = tempfile::tempdir().unwrap();
		let resolver = AssetResolver::new(dir.path(), None).unwrap();
		let err = resolver.resolve(&dir.path().join("missing")).await.unwrap_err();
		assert_eq!(service_error(&err).unwrap().kind(), "asset-missing");
	}
}
