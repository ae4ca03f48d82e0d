use std::fmt;

use ndarray::{s, Array4};
use rand::RngCore;

use super::crop::write_ratio_ranges;
use super::parser::{ratio_ranges_arg, NoiseArg};
use super::region::Region;
use super::{check_same_shape, trace_mismatch, NoiseLayer, NoiseTrace};
use crate::error::Result;

/// Keeps a random rectangle of the watermarked image and takes every other pixel from the cover.
///
/// The mask has hard edges: pixels are selected, never blended, so a full region returns the
/// watermarked image bit for bit and an empty one returns the cover.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cropout {
	height_ratio: (f32, f32),
	width_ratio: (f32, f32),
}

impl Cropout {
	pub fn new(height_ratio: (f32, f32), width_ratio: (f32, f32)) -> Self {
		Self {
			height_ratio,
			width_ratio,
		}
	}

	pub fn from_args(args: &[NoiseArg]) -> Result<Box<dyn NoiseLayer>> {
		let (height_ratio, width_ratio) = ratio_ranges_arg("cropout", args)?;
		Ok(Box::new(Self::new(height_ratio, width_ratio)))
	}
}

impl NoiseLayer for Cropout {
	fn name(&self) -> &'static str {
		"cropout"
	}

	fn forward(
		&self,
		image: &Array4<f32>,
		cover: &Array4<f32>,
		rng: &mut dyn RngCore,
	) -> Result<(Array4<f32>, NoiseTrace)> {
		check_same_shape(image, cover)?;
		let (_, _, height, width) = image.dim();
		let region = Region::random_inside(height, width, self.height_ratio, self.width_ratio, rng);
		let mut out = cover.clone();
		if !region.is_empty() {
			let rows = region.top..region.top + region.height;
			let cols = region.left..region.left + region.width;
			out.slice_mut(s![.., .., rows.clone(), cols.clone()])
				.assign(&image.slice(s![.., .., rows, cols]));
		}
		Ok((out, NoiseTrace::Region(region)))
	}

	/// Cover pixels carry no gradient back to the watermarked image.
	fn backward(&self, grad: &Array4<f32>, trace: &NoiseTrace) -> Result<Array4<f32>> {
		match trace {
			NoiseTrace::Region(region) => Ok(region.keep(grad)),
			other => Err(trace_mismatch("cropout", other)),
		}
	}
}

impl fmt::Display for Cropout {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write_ratio_ranges(f, "cropout", self.height_ratio, self.width_ratio)
	}
}
