use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::{s, Array3, Array4, ArrayView3, Axis};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use tracing::debug;

use crate::constants::{io, network::CHANNELS};
use crate::error::{Result, WatermarkError};

/// Supplies batches of cover images as `[N, 3, H, W]` tensors with values in `[-1, 1]`.
pub trait CoverSource {
	/// Batches drawn per pass over the source.
	fn batches_per_epoch(&self) -> usize;

	/// Starts a new pass.
	fn reset(&mut self, _rng: &mut dyn RngCore) {}

	fn next_batch(&mut self, rng: &mut dyn RngCore) -> Result<Array4<f32>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cropping {
	/// Random position, reshuffled every pass. Used for training.
	Random,
	/// Centre crop in a fixed order. Used for validation.
	Centre,
}

/// Images found under a folder, cropped (or resized, when smaller) to a square patch.
#[derive(Debug, Clone)]
pub struct ImageFolderSource {
	paths: Vec<PathBuf>,
	order: Vec<usize>,
	cursor: usize,
	image_size: usize,
	batch_size: usize,
	cropping: Cropping,
}

impl ImageFolderSource {
	pub fn new(folder: impl AsRef<Path>, image_size: usize, batch_size: usize, cropping: Cropping) -> Result<Self> {
		let folder = folder.as_ref();
		let paths = find_images(folder)?;
		if paths.is_empty() {
			return Err(WatermarkError::Configuration(format!(
				"no images with extensions [{}] found in {}",
				io::IMAGE_EXTENSIONS.join(", "),
				folder.display()
			)));
		}
		if image_size == 0 || batch_size == 0 {
			return Err(WatermarkError::Configuration(
				"image size and batch size must be positive".into(),
			));
		}
		debug!(folder = %folder.display(), images = paths.len(), "Indexed image folder");
		let order = (0..paths.len()).collect();
		Ok(Self {
			paths,
			order,
			cursor: 0,
			image_size,
			batch_size,
			cropping,
		})
	}

	pub fn len(&self) -> usize {
		self.paths.len()
	}

	pub fn is_empty(&self) -> bool {
		self.paths.is_empty()
	}

	fn load(&self, path: &Path, rng: &mut dyn RngCore) -> Result<Array3<f32>> {
		let image = image::open(path)?;
		let patch = crop_or_resize(&image, self.image_size, self.cropping, rng);
		Ok(image_to_tensor(&patch))
	}
}

impl CoverSource for ImageFolderSource {
	fn batches_per_epoch(&self) -> usize {
		(self.paths.len() / self.batch_size).max(1)
	}

	fn reset(&mut self, rng: &mut dyn RngCore) {
		self.cursor = 0;
		if self.cropping == Cropping::Random {
			self.order.shuffle(rng);
		}
	}

	/// Wraps around when the folder holds fewer images than a batch.
	fn next_batch(&mut self, rng: &mut dyn RngCore) -> Result<Array4<f32>> {
		let size = self.image_size;
		let mut batch = Array4::zeros((self.batch_size, CHANNELS, size, size));
		for mut slot in batch.axis_iter_mut(Axis(0)) {
			let index = self.order[self.cursor % self.order.len()];
			self.cursor += 1;
			slot.assign(&self.load(&self.paths[index], rng)?);
		}
		Ok(batch)
	}
}

/// Uniform noise images, for smoke tests and benchmarks without a dataset.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
	image_size: usize,
	batch_size: usize,
	batches: usize,
}

impl SyntheticSource {
	pub fn new(image_size: usize, batch_size: usize, batches: usize) -> Self {
		Self {
			image_size,
			batch_size,
			batches,
		}
	}
}

impl CoverSource for SyntheticSource {
	fn batches_per_epoch(&self) -> usize {
		self.batches
	}

	fn next_batch(&mut self, rng: &mut dyn RngCore) -> Result<Array4<f32>> {
		let size = self.image_size;
		Ok(Array4::from_shape_fn((self.batch_size, CHANNELS, size, size), |_| {
			rng.gen_range(-1.0..=1.0)
		}))
	}
}

fn find_images(folder: &Path) -> Result<Vec<PathBuf>> {
	if !folder.is_dir() {
		return Err(WatermarkError::Configuration(format!(
			"image folder {} does not exist",
			folder.display()
		)));
	}
	let pattern = folder.join("**").join("*");
	let pattern = pattern
		.to_str()
		.ok_or_else(|| WatermarkError::Configuration(format!("non UTF-8 path {}", folder.display())))?;
	let entries = glob::glob(pattern).map_err(|e| WatermarkError::Configuration(e.to_string()))?;
	let mut paths: Vec<PathBuf> = entries
		.filter_map(|entry| entry.ok())
		.filter(|path| path.is_file() && has_image_extension(path))
		.collect();
	paths.sort();
	Ok(paths)
}

fn has_image_extension(path: &Path) -> bool {
	path.extension()
		.and_then(|ext| ext.to_str())
		.map(|ext| io::IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
		.unwrap_or(false)
}

fn crop_or_resize(image: &DynamicImage, size: usize, cropping: Cropping, rng: &mut dyn RngCore) -> RgbImage {
	let size = size as u32;
	let (width, height) = image.dimensions();
	if width < size || height < size {
		return image.resize_to_fill(size, size, FilterType::Triangle).to_rgb8();
	}
	let (left, top) = match cropping {
		Cropping::Random => (rng.gen_range(0..=width - size), rng.gen_range(0..=height - size)),
		Cropping::Centre => ((width - size) / 2, (height - size) / 2),
	};
	image.crop_imm(left, top, size, size).to_rgb8()
}

/// `[3, H, W]` with values mapped from `[0, 255]` to `[-1, 1]`.
pub fn image_to_tensor(image: &RgbImage) -> Array3<f32> {
	let (width, height) = image.dimensions();
	Array3::from_shape_fn((CHANNELS, height as usize, width as usize), |(c, y, x)| {
		image.get_pixel(x as u32, y as u32)[c] as f32 / 127.5 - 1.0
	})
}

pub fn tensor_to_image(tensor: ArrayView3<f32>) -> RgbImage {
	let (_, height, width) = tensor.dim();
	let to_byte = |v: f32| ((v.max(-1.0).min(1.0) + 1.0) * 127.5).round() as u8;
	RgbImage::from_fn(width as u32, height as u32, |x, y| {
		let (x, y) = (x as usize, y as usize);
		Rgb([
			to_byte(tensor[[0, y, x]]),
			to_byte(tensor[[1, y, x]]),
			to_byte(tensor[[2, y, x]]),
		])
	})
}

/// Saves covers along the top row and their watermarked versions underneath, at most `limit` pairs.
pub fn save_comparison(cover: &Array4<f32>, watermarked: &Array4<f32>, limit: usize, path: impl AsRef<Path>) -> Result<()> {
	if cover.dim() != watermarked.dim() {
		return Err(WatermarkError::ShapeMismatch(format!(
			"cover {:?} and watermarked {:?} differ in shape",
			cover.dim(),
			watermarked.dim()
		)));
	}
	let (batch, _, height, width) = cover.dim();
	let count = batch.min(limit.max(1));
	let mut sheet = RgbImage::new((width * count) as u32, (height * 2) as u32);
	for i in 0..count {
		let x = (i * width) as u32;
		image::imageops::replace(&mut sheet, &tensor_to_image(cover.slice(s![i, .., .., ..])), x as i64, 0);
		image::imageops::replace(
			&mut sheet,
			&tensor_to_image(watermarked.slice(s![i, .., .., ..])),
			x as i64,
			height as i64,
		);
	}
	if let Some(parent) = path.as_ref().parent() {
		std::fs::create_dir_all(parent)?;
	}
	sheet.save(path.as_ref())?;
	Ok(())
}
