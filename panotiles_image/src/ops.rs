//! Resampling and compositing operations.

use anyhow::{Result, bail, ensure};
use fast_image_resize::{FilterType, ResizeAlg, ResizeOptions, Resizer};
use image::{DynamicImage, RgbImage};
use panotiles_derive::context;

/// Resampling kernel. `Linear` is used for LOD face scaling, `Cubic` for
/// matching material and mask sizes to the base panorama.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeKernel {
	Linear,
	Cubic,
}

impl ResizeKernel {
	fn filter(self) -> FilterType {
		match self {
			ResizeKernel::Linear => FilterType::Bilinear,
			ResizeKernel::Cubic => FilterType::CatmullRom,
		}
	}
}

/// Resizes `img` to exactly `width`×`height`. Returns a clone without
/// resampling when the size already matches.
#[context("resizing {}x{} to {width}x{height}", img.width(), img.height())]
pub fn resize_to_match(img: &DynamicImage, width: u32, height: u32, kernel: ResizeKernel) -> Result<DynamicImage> {
	if img.width() == width && img.height() == height {
		return Ok(img.clone());
	}

	let mut dst = DynamicImage::new(width, height, img.color());
	Resizer::new().resize(
		img,
		&mut dst,
		&ResizeOptions::default().resize_alg(ResizeAlg::Convolution(kernel.filter())),
	)?;
	Ok(dst)
}

/// Blends `material` over `base` weighted per pixel by `mask`:
/// `out = base·(1−m/255) + material·(m/255)`.
///
/// All math runs in f32 and is clamped on the cast back to 8-bit. The three
/// images must have identical dimensions; `base` and `material` must be RGB8,
/// `mask` single-channel.
#[context("blending {}x{} material through mask", material.width(), material.height())]
pub fn blend_with_mask(base: &DynamicImage, material: &DynamicImage, mask: &DynamicImage) -> Result<DynamicImage> {
	ensure!(
		base.width() == material.width() && base.height() == material.height(),
		"material size {}x{} does not match base {}x{}",
		material.width(),
		material.height(),
		base.width(),
		base.height()
	);
	ensure!(
		base.width() == mask.width() && base.height() == mask.height(),
		"mask size {}x{} does not match base {}x{}",
		mask.width(),
		mask.height(),
		base.width(),
		base.height()
	);

	let (DynamicImage::ImageRgb8(base), DynamicImage::ImageRgb8(material)) = (base, material) else {
		bail!("mask blending requires RGB8 base and material");
	};
	let DynamicImage::ImageLuma8(mask) = mask else {
		bail!("mask blending requires a single-channel mask");
	};

	let mut out = RgbImage::new(base.width(), base.height());
	for (x, y, pixel) in out.enumerate_pixels_mut() {
		let weight = f32::from(mask.get_pixel(x, y)[0]) / 255.0;
		let below = base.get_pixel(x, y);
		let above = material.get_pixel(x, y);
		for channel in 0..3 {
			let value = f32::from(below[channel]).mul_add(1.0 - weight, f32::from(above[channel]) * weight);
			pixel[channel] = value.round().clamp(0.0, 255.0) as u8;
		}
	}
	Ok(DynamicImage::ImageRgb8(out))
}

/// Composites an RGBA `overlay` over an RGB8 `base` with source-over alpha.
#[context("compositing {}x{} overlay", overlay.width(), overlay.height())]
pub fn alpha_over(base: &DynamicImage, overlay: &DynamicImage) -> Result<DynamicImage> {
	ensure!(
		base.width() == overlay.width() && base.height() == overlay.height(),
		"overlay size {}x{} does not match base {}x{}",
		overlay.width(),
		overlay.height(),
		base.width(),
		base.height()
	);

	let DynamicImage::ImageRgb8(base) = base else {
		bail!("alpha compositing requires an RGB8 base");
	};
	let DynamicImage::ImageRgba8(overlay) = overlay else {
		bail!("alpha compositing requires an RGBA8 overlay");
	};

	let mut out = RgbImage::new(base.width(), base.height());
	for (x, y, pixel) in out.enumerate_pixels_mut() {
		let above = overlay.get_pixel(x, y);
		let below = base.get_pixel(x, y);
		let alpha = f32::from(above[3]) / 255.0;
		for channel in 0..3 {
			let value = f32::from(below[channel]).mul_add(1.0 - alpha, f32::from(above[channel]) * alpha);
			pixel[channel] = value.round().clamp(0.0, 255.0) as u8;
		}
	}
	Ok(DynamicImage::ImageRgb8(out))
}
