//! Cubemap splitting: normalizes a horizontal strip panorama into six
//! oriented faces and cuts each face into JPEG tiles for a fixed two-level
//! LOD pyramid.
//!
//! The producer writes the strip in `[px, nx, py, ny, pz, nz]` order reading
//! opposite to the viewer cube, so the strip is horizontally flipped before
//! faces are extracted. The up/down faces additionally need a rotation to
//! align their axes with the viewer frame.

use anyhow::Result;
use panotiles_core::ServiceError;
use panotiles_image::{DynamicImage, ResizeKernel, encode_jpeg, ensure_rgb8, resize_to_match};
use panotiles_derive::context;
use std::path::{Path, PathBuf};

/// Tile edge length in pixels.
pub const TILE_SIZE: u32 = 512;

/// `(face size, grid per face)` per LOD: LOD0 is 1024/2×2, LOD1 is 2048/4×4.
/// 6·(4+16) = 120 tiles per cubemap.
pub const LOD_CONFIGS: [(u32, u32); 2] = [(1024, 2), (2048, 4)];

/// Highest LOD index.
pub const MAX_LOD: u8 = (LOD_CONFIGS.len() - 1) as u8;

const STRIP_FACES: [&str; 6] = ["px", "nx", "py", "ny", "pz", "nz"];

/// Face-worker bound: configured value clamped to `[1, 6]`, defaulting to
/// the CPU count clamped to `[2, 6]`.
pub fn clamp_face_workers(configured: Option<usize>) -> usize {
	match configured {
		Some(workers) => workers.clamp(1, 6),
		None => num_cpus::get().clamp(2, 6),
	}
}

/// One encoded tile, named `{build}_{face}_{lod}_{x}_{y}.jpg` where `(x, y)`
/// are column and row within the LOD grid.
#[derive(Debug, Clone)]
pub struct TileBlob {
	pub filename: String,
	pub bytes: Vec<u8>,
	pub lod: u8,
}

/// Extracts the six faces in viewer orientation, as `(face, letter)` pairs.
///
/// After the horizontal flip, the mapping to published face letters is
/// `px→r, nx→l, pz→f, nz→b`; `py→u` rotated 270° (CCW 90°) and `ny→d`
/// rotated 90° (CW).
pub(crate) fn oriented_faces(flat: &DynamicImage) -> Result<Vec<(DynamicImage, char)>> {
	let flipped = ensure_rgb8(flat.clone()).fliph();
	let face_size = flipped.height();
	if face_size == 0 || flipped.width() != face_size * 6 {
		return Err(ServiceError::InvalidInput("cubemap horizontal inválido".to_string()).into());
	}

	let mut faces = Vec::with_capacity(STRIP_FACES.len());
	for (i, face_key) in STRIP_FACES.iter().enumerate() {
		let face = flipped.crop_imm(i as u32 * face_size, 0, face_size, face_size);
		let oriented = match *face_key {
			"px" => (face, 'r'),
			"nx" => (face, 'l'),
			"py" => (face.rotate270(), 'u'),
			"ny" => (face.rotate90(), 'd'),
			"pz" => (face, 'f'),
			"nz" => (face, 'b'),
			_ => unreachable!(),
		};
		faces.push(oriented);
	}
	Ok(faces)
}

/// Cuts one oriented face into the tiles of one LOD.
fn face_tiles(
	face: &DynamicImage,
	letter: char,
	lod: u8,
	target_size: u32,
	tile_size: u32,
	build: &str,
	jpeg_quality: u8,
) -> Result<Vec<TileBlob>> {
	if tile_size == 0 || target_size % tile_size != 0 {
		return Err(ServiceError::InvalidInput("face não é múltipla do tile_size".to_string()).into());
	}

	let resized = if face.width() == target_size {
		face.clone()
	} else {
		resize_to_match(face, target_size, target_size, ResizeKernel::Linear)?
	};

	let grid = target_size / tile_size;
	let mut tiles = Vec::with_capacity((grid * grid) as usize);
	for y in 0..grid {
		for x in 0..grid {
			let tile = resized.crop_imm(x * tile_size, y * tile_size, tile_size, tile_size);
			let bytes = encode_jpeg(&tile, jpeg_quality)?;
			tiles.push(TileBlob {
				filename: format!("{build}_{letter}_{lod}_{x}_{y}.jpg"),
				bytes,
				lod,
			});
		}
	}
	Ok(tiles)
}

/// Processes all faces of one LOD, fanning out over at most `workers`
/// threads. The image work is CPU-bound; callers on an async runtime should
/// wrap the whole split in `spawn_blocking`.
fn split_lod(
	faces: &[(DynamicImage, char)],
	lod: u8,
	target_size: u32,
	tile_size: u32,
	build: &str,
	jpeg_quality: u8,
	workers: usize,
) -> Result<Vec<TileBlob>> {
	let mut tiles = Vec::new();
	for chunk in faces.chunks(workers.max(1)) {
		let results: Vec<Result<Vec<TileBlob>>> = std::thread::scope(|scope| {
			let handles: Vec<_> = chunk
				.iter()
				.map(|(face, letter)| {
					scope.spawn(move || face_tiles(face, *letter, lod, target_size, tile_size, build, jpeg_quality))
				})
				.collect();
			handles
				.into_iter()
				.map(|handle| handle.join().expect("face worker panicked"))
				.collect()
		});
		for result in results {
			tiles.extend(result?);
		}
	}
	Ok(tiles)
}

/// Splits the flattened panorama into in-memory JPEG tiles for the LOD range
/// `min_lod..=max_lod` (clamped to the fixed pyramid).
///
/// Fails with *invalid-input* when the strip width is not six times its
/// height or when a face size is not a multiple of `tile_size`.
#[context("splitting cubemap for build '{build}' (lod {min_lod}..={max_lod})")]
pub fn split_to_memory(
	flat: &DynamicImage,
	tile_size: u32,
	build: &str,
	min_lod: u8,
	max_lod: u8,
	jpeg_quality: u8,
	face_workers: usize,
) -> Result<Vec<TileBlob>> {
	let max_lod = max_lod.min(MAX_LOD);
	if min_lod > max_lod {
		return Ok(Vec::new());
	}

	let faces = oriented_faces(flat)?;
	let workers = clamp_face_workers(Some(face_workers));

	let mut tiles = Vec::new();
	for lod in min_lod..=max_lod {
		let (target_size, _) = LOD_CONFIGS[lod as usize];
		let lod_tiles = split_lod(&faces, lod, target_size, tile_size, build, jpeg_quality, workers)?;
		log::debug!("lod {lod}: {} tiles generated for build '{build}'", lod_tiles.len());
		tiles.extend(lod_tiles);
	}
	Ok(tiles)
}

/// Disk-backed variant of [`split_to_memory`]: writes each tile into
/// `out_dir` and hands it to `sink` as it lands. Produces byte-identical
/// tiles and filenames; used by paths that stream tiles through the upload
/// queue instead of buffering a whole LOD.
#[context("splitting cubemap for build '{build}' into {:?}", out_dir)]
pub fn split_to_directory(
	flat: &DynamicImage,
	out_dir: &Path,
	tile_size: u32,
	build: &str,
	min_lod: u8,
	max_lod: u8,
	jpeg_quality: u8,
	face_workers: usize,
	sink: &mut dyn FnMut(PathBuf, &str, u8),
) -> Result<usize> {
	let max_lod = max_lod.min(MAX_LOD);
	if min_lod > max_lod {
		return Ok(0);
	}

	std::fs::create_dir_all(out_dir)?;
	let faces = oriented_faces(flat)?;
	let workers = clamp_face_workers(Some(face_workers));

	let mut count = 0;
	for lod in min_lod..=max_lod {
		let (target_size, _) = LOD_CONFIGS[lod as usize];
		for tile in split_lod(&faces, lod, target_size, tile_size, build, jpeg_quality, workers)? {
			let path = out_dir.join(&tile.filename);
			std::fs::write(&path, &tile.bytes)?;
			sink(path, &tile.filename, tile.lod);
			count += 1;
		}
	}
	Ok(count)
}
