//! S3-compatible backend against a Cloudflare R2 bucket.
//!
//! R2 speaks the S3 API, so the implementation is a thin layer over
//! `aws-sdk-s3` with an explicit endpoint and static credentials. R2 has no
//! native append, so `append_jsonl` is a read-modify-write serialized by a
//! per-store mutex; cross-process append ordering is out of scope.

use crate::traits::{ObjectStore, cache_control_for_key, slice_jsonl};
use anyhow::{Context, Result, anyhow};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use panotiles_core::ServiceError;
use serde_json::Value;
use std::path::Path;
use tokio::sync::Mutex;

/// Connection settings of the S3-compatible bucket.
#[derive(Debug, Clone)]
pub struct R2Config {
	pub access_key_id: String,
	pub secret_access_key: String,
	pub bucket: String,
	/// e.g. `https://{account_id}.r2.cloudflarestorage.com`
	pub endpoint_url: String,
}

pub struct R2Store {
	client: Client,
	bucket: String,
	public_url_base: Option<String>,
	append_lock: Mutex<()>,
}

impl R2Store {
	pub fn new(config: &R2Config, public_url_base: Option<String>) -> Self {
		let credentials = Credentials::new(
			config.access_key_id.clone(),
			config.secret_access_key.clone(),
			None,
			None,
			"panotiles",
		);
		let sdk_config = aws_sdk_s3::Config::builder()
			.behavior_version(BehaviorVersion::latest())
			.region(Region::new("auto"))
			.endpoint_url(&config.endpoint_url)
			.credentials_provider(credentials)
			.build();

		log::info!("using R2 bucket '{}' at {}", config.bucket, config.endpoint_url);

		Self {
			client: Client::from_conf(sdk_config),
			bucket: config.bucket.clone(),
			public_url_base,
			append_lock: Mutex::new(()),
		}
	}

	async fn get_object_text(&self, key: &str) -> Result<Option<String>> {
		let response = self.client.get_object().bucket(&self.bucket).key(key).send().await;
		match response {
			Ok(output) => {
				let bytes = output.body.collect().await?.into_bytes();
				Ok(Some(String::from_utf8(bytes.to_vec())?))
			}
			Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => Ok(None),
			Err(err) => Err(anyhow!(err).context(format!("reading '{key}' from R2"))),
		}
	}

	async fn put_object(&self, key: &str, body: ByteStream, content_type: &str) -> Result<()> {
		let mut request = self
			.client
			.put_object()
			.bucket(&self.bucket)
			.key(key)
			.body(body)
			.content_type(content_type);
		if let Some(cache_control) = cache_control_for_key(key) {
			request = request.cache_control(cache_control);
		}
		request
			.send()
			.await
			.map_err(|err| anyhow!(err).context(format!("uploading '{key}' to R2")))?;
		Ok(())
	}
}

#[async_trait::async_trait]
impl ObjectStore for R2Store {
	async fn exists(&self, key: &str) -> Result<bool> {
		match self.client.head_object().bucket(&self.bucket).key(key).send().await {
			Ok(_) => Ok(true),
			Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
			Err(err) => Err(anyhow!(err).context(format!("checking '{key}' in R2"))),
		}
	}

	async fn put_file(&self, src: &Path, key: &str, content_type: &str) -> Result<()> {
		let body = ByteStream::from_path(src)
			.await
			.with_context(|| format!("opening {src:?} for upload"))?;
		self.put_object(key, body, content_type).await?;
		log::debug!("uploaded to R2: {key}");
		Ok(())
	}

	async fn put_bytes(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
		self.put_object(key, ByteStream::from(bytes), content_type).await
	}

	async fn get_json(&self, key: &str) -> Result<Value> {
		let content = self
			.get_object_text(key)
			.await?
			.ok_or_else(|| ServiceError::NotFound(format!("JSON not found in R2: {key}")))?;
		serde_json::from_str(&content).with_context(|| format!("parsing JSON '{key}'"))
	}

	async fn put_json(&self, key: &str, value: &Value) -> Result<()> {
		self
			.put_bytes(key, serde_json::to_vec(value)?, "application/json")
			.await
	}

	async fn append_jsonl(&self, key: &str, value: &Value) -> Result<()> {
		let mut line = serde_json::to_string(value)?;
		line.push('\n');

		// Read-modify-write; the lock keeps appends of this process ordered.
		let _guard = self.append_lock.lock().await;
		let mut content = self.get_object_text(key).await?.unwrap_or_default();
		content.push_str(&line);
		self
			.put_bytes(key, content.into_bytes(), "application/x-ndjson")
			.await
	}

	async fn read_jsonl_slice(&self, key: &str, cursor: usize, limit: usize) -> Result<(Vec<Value>, usize)> {
		match self.get_object_text(key).await? {
			Some(content) => Ok(slice_jsonl(&content, key, cursor, limit)),
			None => Ok((Vec::new(), cursor)),
		}
	}

	async fn download_file(&self, key: &str, dest: &Path) -> Result<()> {
		let response = self.client.get_object().bucket(&self.bucket).key(key).send().await;
		let output = match response {
			Ok(output) => output,
			Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
				return Err(ServiceError::NotFound(format!("object not found in R2: {key}")).into());
			}
			Err(err) => return Err(anyhow!(err).context(format!("downloading '{key}' from R2"))),
		};

		if let Some(parent) = dest.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		let bytes = output.body.collect().await?.into_bytes();
		tokio::fs::write(dest, &bytes).await?;
		log::debug!("downloaded from R2: {key}");
		Ok(())
	}

	fn public_url(&self, key: &str) -> Result<String> {
		let base = self
			.public_url_base
			.as_deref()
			.ok_or_else(|| anyhow!("PUBLIC_URL_BASE is not configured"))?;
		Ok(format!("{}/{key}", base.trim_end_matches('/')))
	}
}
