//! Build strings, identifier validation and object-store key assembly.
//!
//! A *build string* is the primary cache key of the service: a fixed-length
//! base-36 identifier derived deterministically from the scene index and the
//! user's per-layer item selection. Unselected and unknown layers collapse to
//! the all-zero slot, so "nothing selected" and "default selected" produce
//! the same key.

use crate::client_config::Layer;
use crate::error::ServiceError;
use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

/// Base-36 digits of the scene prefix.
pub const SCENE_CHARS: usize = 2;
/// Base-36 digits per layer slot.
pub const LAYER_CHARS: usize = 2;
/// Number of layer slots, independent of how many layers a scene defines.
pub const FIXED_LAYERS: usize = 5;
/// Total build-string length.
pub const BUILD_LEN: usize = SCENE_CHARS + FIXED_LAYERS * LAYER_CHARS;

lazy_static! {
	static ref BUILD_RE: Regex = Regex::new(r"^[0-9a-z]{12}$").unwrap();
	static ref SAFE_ID_RE: Regex = Regex::new(r"^[a-z0-9]([a-z0-9\-]{0,62}[a-z0-9])?$").unwrap();
	/// Grammar of published tile filenames: `{build}_{face}_{lod}_{x}_{y}.jpg`.
	pub static ref TILE_FILE_RE: Regex = Regex::new(r"^[0-9a-z]+_[fblrud]_[01]_\d+_\d+\.jpg$").unwrap();
	/// Grammar of a tile-root key as accepted by the events endpoint.
	pub static ref TILE_ROOT_RE: Regex =
		Regex::new(r"^clients/[a-z0-9-]+/cubemap/[a-z0-9-]+/tiles/[0-9a-z]+$").unwrap();
}

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Encodes `n` as a zero-padded lowercase base-36 string of exactly `width`
/// characters. Values that do not fit the width are a programmer error.
pub fn encode_base36(n: u64, width: usize) -> String {
	let mut digits = Vec::new();
	let mut n = n;
	while n > 0 {
		digits.push(BASE36_DIGITS[(n % 36) as usize]);
		n /= 36;
	}
	while digits.len() < width {
		digits.push(b'0');
	}
	debug_assert!(digits.len() == width, "value does not fit into {width} base-36 chars");
	digits.reverse();
	String::from_utf8(digits).unwrap()
}

/// Derives the build string for a `(scene_index, selection)` pair.
///
/// Every layer with a `build_order` inside the fixed slot range contributes
/// the index of its selected item; layers without a selection, selections
/// naming an unknown item, and out-of-range slots all contribute zero. The
/// result is canonical regardless of the order layers appear in.
pub fn build_string_from_selection(scene_index: u32, layers: &[Layer], selection: &HashMap<String, String>) -> String {
	let mut layer_values = [0u16; FIXED_LAYERS];

	for layer in layers {
		let slot = layer.build_order as usize;
		if slot >= FIXED_LAYERS {
			continue;
		}
		let Some(selected_id) = selection.get(&layer.id) else {
			continue;
		};
		if selected_id.is_empty() {
			continue;
		}
		if let Some(item) = layer.items.iter().find(|item| &item.id == selected_id) {
			layer_values[slot] = item.index;
		}
	}

	let mut build = encode_base36(u64::from(scene_index), SCENE_CHARS);
	for value in layer_values {
		build.push_str(&encode_base36(u64::from(value), LAYER_CHARS));
	}
	build
}

/// Accepts a build string iff it is exactly [`BUILD_LEN`] lowercase base-36
/// characters.
pub fn validate_build_string(build: &str) -> Result<&str> {
	if build.len() != BUILD_LEN || !BUILD_RE.is_match(build) {
		return Err(ServiceError::InvalidInput(format!("invalid build string '{build}'")).into());
	}
	Ok(build)
}

/// Accepts an identifier that is safe to embed in object-store keys and URLs.
///
/// Lowercase alphanumerics and hyphens, 1-64 chars, no leading/trailing
/// hyphen, and none of `..`, `/`, `\` anywhere. Applied to every path segment
/// that composes a key, which is what keeps tenants isolated from each other.
pub fn validate_safe_id<'a>(value: &'a str, field: &str) -> Result<&'a str> {
	if value.is_empty() {
		return Err(ServiceError::InvalidInput(format!("{field} is missing")).into());
	}
	if value.contains("..") || value.contains('/') || value.contains('\\') {
		return Err(ServiceError::InvalidInput(format!("{field} contains forbidden characters")).into());
	}
	if !SAFE_ID_RE.is_match(value) {
		return Err(
			ServiceError::InvalidInput(format!("{field} must contain only lowercase letters, digits and hyphens")).into(),
		);
	}
	Ok(value)
}

/// Key prefix holding all tiles and metadata of one build.
pub fn tile_root(client: &str, scene: &str, build: &str) -> String {
	format!("clients/{client}/cubemap/{scene}/tiles/{build}")
}

/// Key of the build's metadata document.
pub fn metadata_key(tile_root: &str) -> String {
	format!("{tile_root}/metadata.json")
}

/// Key of the build's NDJSON upload event log.
pub fn events_key(tile_root: &str) -> String {
	format!("{tile_root}/tile_events.ndjson")
}

/// Single-flight identity of a render invocation.
pub fn render_key(client: &str, scene: &str, build: &str) -> String {
	format!("{client}:{scene}:{build}")
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::client_config::Item;
	use rstest::rstest;

	fn layer(id: &str, build_order: u8, items: &[(&str, u16)]) -> Layer {
		Layer {
			id: id.to_string(),
			build_order,
			items: items
				.iter()
				.map(|(item_id, index)| Item {
					id: (*item_id).to_string(),
					index: *index,
					file: None,
				})
				.collect(),
			mask: None,
		}
	}

	#[rstest]
	#[case(0, 2, "00")]
	#[case(35, 2, "0z")]
	#[case(36, 2, "10")]
	#[case(1295, 2, "zz")]
	#[case(7, 1, "7")]
	#[case(0, 4, "0000")]
	fn encode_base36_pads_to_width(#[case] n: u64, #[case] width: usize, #[case] expected: &str) {
		assert_eq!(encode_base36(n, width), expected);
	}

	#[test]
	fn build_string_has_fixed_length_and_grammar() {
		let layers = vec![layer("floor", 0, &[("marble", 1)]), layer("walls", 1, &[("white", 2)])];
		let selection = HashMap::from([
			("floor".to_string(), "marble".to_string()),
			("walls".to_string(), "white".to_string()),
		]);

		let build = build_string_from_selection(0, &layers, &selection);
		assert_eq!(build, "000102000000");
		assert_eq!(build.len(), BUILD_LEN);
		assert!(validate_build_string(&build).is_ok());
	}

	#[test]
	fn absent_and_unknown_selections_collapse_to_zero() {
		let layers = vec![layer("floor", 0, &[("marble", 1)])];

		let empty = build_string_from_selection(3, &layers, &HashMap::new());
		let unknown = build_string_from_selection(
			3,
			&layers,
			&HashMap::from([("floor".to_string(), "granite".to_string())]),
		);
		let stray = build_string_from_selection(
			3,
			&layers,
			&HashMap::from([("ceiling".to_string(), "marble".to_string())]),
		);

		assert_eq!(empty, "030000000000");
		assert_eq!(unknown, empty);
		assert_eq!(stray, empty);
	}

	#[test]
	fn out_of_range_build_order_is_ignored() {
		let layers = vec![layer("extra", FIXED_LAYERS as u8, &[("x", 9)])];
		let selection = HashMap::from([("extra".to_string(), "x".to_string())]);
		assert_eq!(build_string_from_selection(0, &layers, &selection), "000000000000");
	}

	#[test]
	fn build_string_is_deterministic_across_layer_order() {
		let mut layers = vec![
			layer("a", 0, &[("x", 4)]),
			layer("b", 2, &[("y", 7)]),
			layer("c", 4, &[("z", 35)]),
		];
		let selection = HashMap::from([
			("a".to_string(), "x".to_string()),
			("b".to_string(), "y".to_string()),
			("c".to_string(), "z".to_string()),
		]);

		let forward = build_string_from_selection(1, &layers, &selection);
		layers.reverse();
		let reversed = build_string_from_selection(1, &layers, &selection);
		assert_eq!(forward, reversed);
		assert_eq!(forward, "01040007000z");

		// fixed width: scene(2) + 5 slots * 2
		assert_eq!(forward.len(), BUILD_LEN);
	}

	#[rstest]
	#[case("ab0000000000", true)]
	#[case("000000000000", true)]
	#[case("zzzzzzzzzzzz", true)]
	#[case("ab00", false)]
	#[case("ab0000000000ff", false)]
	#[case("AB0000000000", false)]
	#[case("ab00000000-0", false)]
	#[case("", false)]
	fn build_string_validator(#[case] build: &str, #[case] ok: bool) {
		assert_eq!(validate_build_string(build).is_ok(), ok);
	}

	#[rstest]
	#[case("acme", true)]
	#[case("acme-studio", true)]
	#[case("a", true)]
	#[case("0house9", true)]
	#[case("-acme", false)]
	#[case("acme-", false)]
	#[case("Acme", false)]
	#[case("../etc", false)]
	#[case("a/b", false)]
	#[case("a\\b", false)]
	#[case("a..b", false)]
	#[case("", false)]
	#[case("acme studio", false)]
	fn safe_id_validator(#[case] value: &str, #[case] ok: bool) {
		assert_eq!(validate_safe_id(value, "client").is_ok(), ok);
	}

	#[test]
	fn key_assembly() {
		let root = tile_root("acme", "kitchen", "000102000000");
		assert_eq!(root, "clients/acme/cubemap/kitchen/tiles/000102000000");
		assert_eq!(metadata_key(&root), format!("{root}/metadata.json"));
		assert_eq!(events_key(&root), format!("{root}/tile_events.ndjson"));
		assert_eq!(render_key("acme", "kitchen", "000102000000"), "acme:kitchen:000102000000");
		assert!(TILE_ROOT_RE.is_match(&root));
	}

	#[rstest]
	#[case("000102000000_f_0_0_1.jpg", true)]
	#[case("000102000000_u_1_3_3.jpg", true)]
	#[case("000102000000_t_0_0_1.jpg", false)]
	#[case("000102000000_f_2_0_1.jpg", false)]
	#[case("000102000000_f_0_0_1.png", false)]
	#[case("_f_0_0_1.jpg", false)]
	fn tile_filename_grammar(#[case] name: &str, #[case] ok: bool) {
		assert_eq!(TILE_FILE_RE.is_match(name), ok);
	}
}
