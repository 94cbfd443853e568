//! JPEG encoding and decoding bridges.
//!
//! Tiles are always published as baseline JPEG without metadata. Only 8-bit
//! Grey and RGB images are accepted, since JPEG has no transparency.

use anyhow::{Result, anyhow, bail};
use image::{DynamicImage, ImageEncoder, ImageFormat, codecs::jpeg::JpegEncoder, load_from_memory_with_format};
use panotiles_derive::context;

/// Encodes a `DynamicImage` as JPEG bytes.
///
/// `quality` is 1..=99; higher means better visual quality but larger output.
#[context("encoding {}x{} {:?} as JPEG (q={})", image.width(), image.height(), image.color(), quality)]
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
	if quality == 0 || quality >= 100 {
		bail!("JPEG quality must be in 1..=99");
	}
	match image.color().channel_count() {
		1 | 3 => {}
		_ => bail!("JPEG only supports Grey or RGB images without alpha channel"),
	}

	let mut buffer: Vec<u8> = Vec::new();
	JpegEncoder::new_with_quality(&mut buffer, quality).write_image(
		image.as_bytes(),
		image.width(),
		image.height(),
		image.color().into(),
	)?;

	Ok(buffer)
}

/// Decodes JPEG bytes back into a `DynamicImage`.
#[context("decoding JPEG image ({} bytes)", bytes.len())]
pub fn decode_jpeg(bytes: &[u8]) -> Result<DynamicImage> {
	load_from_memory_with_format(bytes, ImageFormat::Jpeg).map_err(|e| anyhow!("failed to decode JPEG image: {e}"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use image::{GenericImageView, RgbImage, Rgb};
	use rstest::rstest;

	#[test]
	fn encode_decode_preserves_dimensions_and_channels() {
		let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 32, Rgb([120, 130, 140])));
		let bytes = encode_jpeg(&img, 85).unwrap();
		assert_eq!(&bytes[0..2], &[0xff, 0xd8], "missing JPEG SOI marker");

		let decoded = decode_jpeg(&bytes).unwrap();
		assert_eq!(decoded.dimensions(), (64, 32));
		assert_eq!(decoded.color().channel_count(), 3);
	}

	#[test]
	fn lower_quality_produces_smaller_output() {
		let img = DynamicImage::ImageRgb8(RgbImage::from_fn(128, 128, |x, y| {
			Rgb([(x * 2) as u8, (y * 2) as u8, ((x + y) % 255) as u8])
		}));
		let high = encode_jpeg(&img, 95).unwrap();
		let low = encode_jpeg(&img, 40).unwrap();
		assert!(low.len() < high.len());
	}

	#[rstest]
	#[case(0)]
	#[case(100)]
	#[case(255)]
	fn rejects_out_of_range_quality(#[case] quality: u8) {
		let img = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
		assert!(encode_jpeg(&img, quality).is_err());
	}

	#[test]
	fn rejects_alpha_images() {
		let img = DynamicImage::ImageRgba8(image::RgbaImage::new(4, 4));
		let err = encode_jpeg(&img, 85).unwrap_err();
		assert!(
			err.chain().last().unwrap().to_string().contains("without alpha"),
			"unexpected error: {err:#}"
		);
	}
}
