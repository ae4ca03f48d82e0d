use ndarray::{s, Array4};
use rand::{Rng, RngCore};

/// Axis-aligned rectangle inside an image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
	pub top: usize,
	pub left: usize,
	pub height: usize,
	pub width: usize,
}

impl Region {
	/// Draws a rectangle whose height and width are independent uniform fractions of the image size,
	/// placed uniformly among the positions where it fits.
	pub fn random_inside(
		height: usize,
		width: usize,
		height_ratio: (f32, f32),
		width_ratio: (f32, f32),
		rng: &mut dyn RngCore,
	) -> Self {
		let region_height = scaled(height, sample_ratio(height_ratio, rng));
		let region_width = scaled(width, sample_ratio(width_ratio, rng));
		Self {
			top: rng.gen_range(0..=height - region_height),
			left: rng.gen_range(0..=width - region_width),
			height: region_height,
			width: region_width,
		}
	}

	pub fn is_empty(&self) -> bool {
		self.height == 0 || self.width == 0
	}

	pub fn contains(&self, y: usize, x: usize) -> bool {
		y >= self.top && y < self.top + self.height && x >= self.left && x < self.left + self.width
	}

	/// Copy of `source` with everything outside the region set to zero.
	pub fn keep(&self, source: &Array4<f32>) -> Array4<f32> {
		let mut out = Array4::zeros(source.raw_dim());
		if !self.is_empty() {
			let (rows, cols) = (self.top..self.top + self.height, self.left..self.left + self.width);
			out.slice_mut(s![.., .., rows.clone(), cols.clone()])
				.assign(&source.slice(s![.., .., rows, cols]));
		}
		out
	}
}

/// Uniform draw from `[min, max]`; a degenerate range returns `min` without consuming randomness.
pub(crate) fn sample_ratio((min, max): (f32, f32), rng: &mut dyn RngCore) -> f32 {
	if max > min {
		rng.gen_range(min..=max)
	} else {
		min
	}
}

fn scaled(size: usize, ratio: f32) -> usize {
	((size as f32 * ratio).round() as usize).min(size)
}
