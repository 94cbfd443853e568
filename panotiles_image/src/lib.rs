//! Image primitives for the panotiles render pipeline.
//!
//! Everything is built around [`image::DynamicImage`]: loading with channel
//! normalization, resampling via `fast_image_resize`, the two compositing
//! operations (mask blend and alpha-over) and JPEG encoding. The render crate
//! combines these into the compositor and the cubemap splitter.

pub mod jpeg;
pub mod load;
pub mod ops;

pub use image::{DynamicImage, GenericImageView, ImageBuffer, Luma, Rgb, Rgba};
pub use jpeg::*;
pub use load::*;
pub use ops::*;
