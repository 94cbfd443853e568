//! The compositor: flattens a scene from its base panorama and the selected
//! layer materials.
//!
//! Two variants exist. The production path blends each selected material
//! through the layer's grayscale mask. The overlay variant composites
//! alpha-carrying overlay images and is used by 2D previews. Both resolve
//! assets through the [`AssetResolver`] first (which may download from the
//! object store) and then run the pixel work on a blocking thread.
//!
//! Missing materials or masks are tolerated: they are recorded, logged and
//! skipped, because tenant configuration routinely drifts ahead of uploaded
//! assets. A missing *base* image is fatal.

use anyhow::{Context, Result};
use panotiles_core::Layer;
use panotiles_derive::context;
use panotiles_image::{DynamicImage, GenericImageView, ResizeKernel, alpha_over, blend_with_mask, load_mask, load_overlay, load_rgb8, resize_to_match};
use panotiles_store::AssetResolver;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

struct ResolvedBlend {
	layer_id: String,
	item_id: String,
	material: PathBuf,
	mask: PathBuf,
}

struct ResolvedOverlay {
	layer_id: String,
	overlay: PathBuf,
}

fn layers_in_build_order(layers: &[Layer]) -> Vec<&Layer> {
	let mut sorted: Vec<&Layer> = layers.iter().collect();
	sorted.sort_by_key(|layer| layer.build_order);
	sorted
}

fn selected_item<'a>(layer: &'a Layer, selection: &HashMap<String, String>) -> Option<&'a panotiles_core::Item> {
	let item_id = selection.get(&layer.id)?;
	if item_id.is_empty() {
		return None;
	}
	layer.items.iter().find(|item| &item.id == item_id)
}

/// Flattens the scene with the mask-blend compositor (the production path).
///
/// The base is resolved at `{assets_root}/{asset_prefix}base_{scene_id}`,
/// materials below `materials/` and masks below `masks/`, all without
/// extension. Returns an 8-bit RGB image sized like the base.
#[context("compositing scene '{scene_id}' (prefix '{asset_prefix}')")]
pub async fn stack_layers(
	resolver: &AssetResolver,
	scene_id: &str,
	layers: &[Layer],
	selection: &HashMap<String, String>,
	assets_root: &Path,
	asset_prefix: &str,
) -> Result<DynamicImage> {
	let base_path = resolver
		.resolve(&assets_root.join(format!("{asset_prefix}base_{scene_id}")))
		.await?;

	let mut blends = Vec::new();
	let mut missing = Vec::new();
	for layer in layers_in_build_order(layers) {
		let Some(item) = selected_item(layer, selection) else {
			continue;
		};
		let (Some(material_file), Some(mask_file)) = (item.file.as_deref(), layer.mask.as_deref()) else {
			continue;
		};

		let material_base = assets_root.join("materials").join(format!("{asset_prefix}{material_file}"));
		let mask_base = assets_root.join("masks").join(format!("{asset_prefix}{mask_file}"));
		match (resolver.resolve(&material_base).await, resolver.resolve(&mask_base).await) {
			(Ok(material), Ok(mask)) => blends.push(ResolvedBlend {
				layer_id: layer.id.clone(),
				item_id: item.id.clone(),
				material,
				mask,
			}),
			_ => missing.push((layer.id.clone(), material_file.to_string(), mask_file.to_string())),
		}
	}
	if !missing.is_empty() {
		log::warn!("missing assets (skipped): {missing:?}");
	}

	tokio::task::spawn_blocking(move || {
		let mut result = load_rgb8(&base_path)?;
		let (width, height) = result.dimensions();

		for blend in blends {
			let material = resize_to_match(&load_rgb8(&blend.material)?, width, height, ResizeKernel::Cubic)?;
			let mask = resize_to_match(&load_mask(&blend.mask)?, width, height, ResizeKernel::Cubic)?;
			result = blend_with_mask(&result, &material, &mask)?;
			log::info!("layer {} -> {}", blend.layer_id, blend.item_id);
		}

		log::debug!("stacked scene image is {width}x{height}");
		Ok(result)
	})
	.await
	.context("compositor worker panicked")?
}

/// Flattens the scene by alpha-compositing overlay images, used by 2D
/// previews. Overlays live at `layers/{layer_id}/{layer_id}_{item_id}`.
#[context("compositing scene '{scene_id}' with overlays")]
pub async fn stack_layers_overlay(
	resolver: &AssetResolver,
	scene_id: &str,
	layers: &[Layer],
	selection: &HashMap<String, String>,
	assets_root: &Path,
) -> Result<DynamicImage> {
	let base_path = resolver.resolve(&assets_root.join(format!("base_{scene_id}"))).await?;

	let mut overlays = Vec::new();
	let mut missing = Vec::new();
	for layer in layers_in_build_order(layers) {
		let Some(item) = selected_item(layer, selection) else {
			continue;
		};
		if item.file.is_none() {
			continue;
		}

		let file_name = format!("{}_{}", layer.id, item.id);
		let overlay_base = assets_root.join("layers").join(&layer.id).join(&file_name);
		match resolver.resolve(&overlay_base).await {
			Ok(overlay) => overlays.push(ResolvedOverlay {
				layer_id: layer.id.clone(),
				overlay,
			}),
			Err(_) => missing.push((layer.id.clone(), file_name)),
		}
	}
	if !missing.is_empty() {
		log::warn!("missing overlays (skipped): {missing:?}");
	}

	tokio::task::spawn_blocking(move || {
		let mut result = load_rgb8(&base_path)?;
		let (width, height) = result.dimensions();

		for item in overlays {
			let overlay = resize_to_match(&load_overlay(&item.overlay)?, width, height, ResizeKernel::Cubic)?;
			result = alpha_over(&result, &overlay)?;
			log::debug!("overlay applied: {}", item.layer_id);
		}

		Ok(result)
	})
	.await
	.context("compositor worker panicked")?
}
