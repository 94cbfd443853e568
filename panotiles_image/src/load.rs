//! Image loading with channel normalization.
//!
//! Source assets arrive as PNG or JPEG with 1, 2, 3 or 4 bands. The pipeline
//! only ever works on three normalized shapes: RGB8 for bases and materials,
//! Luma8 for masks, RGBA8 for overlays.

use anyhow::Result;
use image::DynamicImage;
use panotiles_derive::context;
use std::path::Path;

/// Loads an image and converts it to 8-bit RGB, dropping any alpha band.
#[context("loading RGB image from {:?}", path)]
pub fn load_rgb8(path: &Path) -> Result<DynamicImage> {
	let img = image::open(path)?;
	Ok(ensure_rgb8(img))
}

/// Loads a mask as single-channel 8-bit grayscale. Multi-band sources are
/// converted to grayscale first.
#[context("loading mask from {:?}", path)]
pub fn load_mask(path: &Path) -> Result<DynamicImage> {
	let img = image::open(path)?;
	Ok(match img {
		DynamicImage::ImageLuma8(_) => img,
		other => DynamicImage::ImageLuma8(other.to_luma8()),
	})
}

/// Loads an overlay as 8-bit RGBA; sources without alpha become fully opaque.
#[context("loading overlay from {:?}", path)]
pub fn load_overlay(path: &Path) -> Result<DynamicImage> {
	let img = image::open(path)?;
	Ok(match img {
		DynamicImage::ImageRgba8(_) => img,
		other => DynamicImage::ImageRgba8(other.to_rgba8()),
	})
}

/// Converts any supported image to 8-bit RGB.
pub fn ensure_rgb8(img: DynamicImage) -> DynamicImage {
	match img {
		DynamicImage::ImageRgb8(_) => img,
		other => DynamicImage::ImageRgb8(other.to_rgb8()),
	}
}
