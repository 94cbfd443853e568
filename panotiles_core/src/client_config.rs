//! Per-tenant configuration model.
//!
//! Tenant configs are stored as JSON in the object store under
//! `clients/{client}/{client}_cfg.json`. The JSON is dynamic (it is edited by
//! an external CRUD tool), so it is parsed into typed records here at the
//! loader boundary; the rest of the service only sees typed values.
//!
//! A config either carries a `scenes` map or a flat top-level `layers` list;
//! the latter is normalized into a single `"default"` scene. Scene iteration
//! order follows the JSON document, which is why `scenes` is an `IndexMap`.

use crate::error::ServiceError;
use anyhow::Result;
use indexmap::IndexMap;
use panotiles_derive::context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One selectable material of a layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
	pub id: String,
	/// Position of this item in the layer's build-string slot.
	#[serde(default)]
	pub index: u16,
	/// Material filename under `materials/`; `None` means "leave the base".
	#[serde(default)]
	pub file: Option<String>,
}

/// A configurable layer of a scene.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
	pub id: String,
	/// Slot of this layer in the build string, `0..FIXED_LAYERS`.
	#[serde(default)]
	pub build_order: u8,
	#[serde(default)]
	pub items: Vec<Item>,
	/// Mask filename under `masks/` used by the blend compositor.
	#[serde(default)]
	pub mask: Option<String>,
}

/// A renderable scene of a tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
	#[serde(default)]
	pub scene_index: u32,
	#[serde(default)]
	pub layers: Vec<Layer>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub base_image: Option<String>,
}

/// Normalized tenant configuration with the owning `client_id` injected.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
	pub client_id: String,
	pub scenes: IndexMap<String, Scene>,
}

/// Raw document shape before normalization. Unknown fields are tolerated so
/// the CRUD tool can evolve the document without breaking the renderer.
#[derive(Debug, Deserialize)]
struct RawClientConfig {
	#[serde(default)]
	scenes: Option<IndexMap<String, Scene>>,
	#[serde(default)]
	layers: Option<Vec<Layer>>,
	#[serde(default)]
	naming: Option<Value>,
}

/// Parses and validates a raw tenant config document.
///
/// Returns the normalized config plus the free-form `naming` object. Fails
/// with a *config-invalid* error when the document does not parse, when it
/// carries neither `scenes` nor `layers`, or when a layer has no id.
#[context("validating config of client '{client_id}'")]
pub fn parse_client_config(client_id: &str, raw: Value) -> Result<(ClientConfig, Value)> {
	let raw: RawClientConfig = serde_json::from_value(raw)
		.map_err(|e| ServiceError::ConfigInvalid(format!("config for client '{client_id}' is malformed: {e}")))?;

	let scenes = match raw.scenes {
		Some(scenes) if !scenes.is_empty() => scenes,
		_ => {
			let Some(layers) = raw.layers else {
				return Err(
					ServiceError::ConfigInvalid(format!(
						"config for client '{client_id}' needs either 'scenes' or 'layers'"
					))
					.into(),
				);
			};
			let mut scenes = IndexMap::new();
			scenes.insert(
				"default".to_string(),
				Scene {
					scene_index: 0,
					layers,
					base_image: None,
				},
			);
			scenes
		}
	};

	for (scene_id, scene) in &scenes {
		for layer in &scene.layers {
			if layer.id.is_empty() {
				return Err(
					ServiceError::ConfigInvalid(format!("scene '{scene_id}' contains a layer without an id")).into(),
				);
			}
			if layer.build_order as usize >= crate::ids::FIXED_LAYERS {
				log::warn!(
					"scene '{scene_id}': layer '{}' has build_order {} outside the fixed slot range and will be ignored",
					layer.id,
					layer.build_order
				);
			}
		}
	}

	Ok((
		ClientConfig {
			client_id: client_id.to_string(),
			scenes,
		},
		raw.naming.unwrap_or_else(|| Value::Object(serde_json::Map::new())),
	))
}
