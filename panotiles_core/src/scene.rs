//! Scene context resolution.

use crate::client_config::{ClientConfig, Layer};
use crate::error::ServiceError;
use anyhow::Result;
use panotiles_derive::context;
use std::path::{Path, PathBuf};

/// The per-request bundle the compositor works from.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneContext {
	pub scene_id: String,
	pub scene_index: u32,
	pub layers: Vec<Layer>,
	/// Directory holding the scene's base image, `materials/` and `masks/`.
	pub assets_root: PathBuf,
}

/// Resolves the scene a request refers to.
///
/// When `scene_id` is omitted the first scene in document order is used. The
/// default assets root is `{cache_root}/clients/{client}/scenes/{scene}`;
/// `assets_root` overrides it for renders that stage assets elsewhere.
#[context("resolving scene {scene_id:?} of client '{}'", project.client_id)]
pub fn resolve_scene_context(
	project: &ClientConfig,
	scene_id: Option<&str>,
	cache_root: &Path,
	assets_root: Option<PathBuf>,
) -> Result<SceneContext> {
	let scene_id = match scene_id {
		Some(id) => id.to_string(),
		None => project
			.scenes
			.keys()
			.next()
			.ok_or_else(|| ServiceError::ConfigInvalid(format!("client '{}' has no scenes", project.client_id)))?
			.clone(),
	};

	let scene = project
		.scenes
		.get(&scene_id)
		.ok_or_else(|| ServiceError::InvalidInput(format!("unknown scene '{scene_id}'")))?;

	let assets_root = assets_root.unwrap_or_else(|| {
		cache_root
			.join("clients")
			.join(&project.client_id)
			.join("scenes")
			.join(&scene_id)
	});

	Ok(SceneContext {
		scene_id,
		scene_index: scene.scene_index,
		layers: scene.layers.clone(),
		assets_root,
	})
}
