//! Tile manifest and metadata documents.

use serde::{Deserialize, Serialize};

/// The manifest returned by the render API. Clients expand `pattern` into
/// individual tile URLs below `{base_url}/{tile_root}/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileManifest {
	pub base_url: String,
	pub tile_root: String,
	pub pattern: String,
	pub build: String,
}

impl TileManifest {
	pub fn new(base_url: &str, tile_root: &str, build: &str) -> Self {
		Self {
			base_url: base_url.to_string(),
			tile_root: tile_root.to_string(),
			pattern: format!("{build}_{{f}}_{{z}}_{{x}}_{{y}}.jpg"),
			build: build.to_string(),
		}
	}
}

/// The `metadata.json` document published next to the tiles. Written twice:
/// once after the coarse LOD (`status: "processing"`) and once after the fine
/// LOD (`status: "ready"`); `ready` is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildMetadata {
	pub client: String,
	pub scene: String,
	pub build: String,
	#[serde(rename = "tileRoot")]
	pub tile_root: String,
	pub generated_at: u64,
	pub status: String,
	pub last_stage: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub lod0_tiles_count: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tiles_count: Option<u32>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use serde_json::json;

	#[test]
	fn manifest_serializes_camel_case() {
		let manifest = TileManifest::new(
			"https://cdn.example.com",
			"clients/acme/cubemap/kitchen/tiles/000102000000",
			"000102000000",
		);
		assert_eq!(
			serde_json::to_value(&manifest).unwrap(),
			json!({
				"baseUrl": "https://cdn.example.com",
				"tileRoot": "clients/acme/cubemap/kitchen/tiles/000102000000",
				"pattern": "000102000000_{f}_{z}_{x}_{y}.jpg",
				"build": "000102000000",
			})
		);
	}

	#[test]
	fn metadata_roundtrips_and_omits_absent_counts() {
		let metadata = BuildMetadata {
			client: "acme".to_string(),
			scene: "kitchen".to_string(),
			build: "000102000000".to_string(),
			tile_root: "clients/acme/cubemap/kitchen/tiles/000102000000".to_string(),
			generated_at: 1_700_000_000,
			status: "processing".to_string(),
			last_stage: "lod0_ready".to_string(),
			lod0_tiles_count: Some(24),
			tiles_count: None,
		};

		let value = serde_json::to_value(&metadata).unwrap();
		assert_eq!(value["tileRoot"], metadata.tile_root);
		assert!(value.get("tiles_count").is_none());

		let parsed: BuildMetadata = serde_json::from_value(value).unwrap();
		assert_eq!(parsed, metadata);
	}
}
