use std::fmt;

use ndarray::{Array2, Array4};
use rand::{Rng, RngCore};

use super::parser::{check_unit_range, range_arg, NoiseArg};
use super::region::sample_ratio;
use super::{check_same_shape, trace_mismatch, NoiseLayer, NoiseTrace};
use crate::error::{Result, WatermarkError};

/// Keeps each watermarked pixel with probability `p ~ U[min, max]` and substitutes the cover pixel
/// otherwise. One `[H, W]` mask is drawn per call and shared by every image and channel of the batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dropout {
	keep_ratio: (f32, f32),
}

impl Dropout {
	pub fn new(keep_ratio: (f32, f32)) -> Self {
		Self { keep_ratio }
	}

	pub fn from_args(args: &[NoiseArg]) -> Result<Box<dyn NoiseLayer>> {
		let keep_ratio = range_arg("dropout", args)?;
		check_unit_range("dropout", keep_ratio)?;
		Ok(Box::new(Self::new(keep_ratio)))
	}
}

impl NoiseLayer for Dropout {
	fn name(&self) -> &'static str {
		"dropout"
	}

	fn forward(
		&self,
		image: &Array4<f32>,
		cover: &Array4<f32>,
		rng: &mut dyn RngCore,
	) -> Result<(Array4<f32>, NoiseTrace)> {
		check_same_shape(image, cover)?;
		let (_, _, height, width) = image.dim();
		let keep = f64::from(sample_ratio(self.keep_ratio, rng)).max(0.0).min(1.0);
		let mask = Array2::from_shape_fn((height, width), |_| rng.gen_bool(keep));

		let mut out = cover.clone();
		for ((n, c, y, x), value) in out.indexed_iter_mut() {
			if mask[[y, x]] {
				*value = image[[n, c, y, x]];
			}
		}
		Ok((out, NoiseTrace::PixelMask(mask)))
	}

	fn backward(&self, grad: &Array4<f32>, trace: &NoiseTrace) -> Result<Array4<f32>> {
		let mask = match trace {
			NoiseTrace::PixelMask(mask) => mask,
			other => return Err(trace_mismatch("dropout", other)),
		};
		let (_, _, height, width) = grad.dim();
		if mask.dim() != (height, width) {
			return Err(WatermarkError::ShapeMismatch(format!(
				"dropout mask {:?} does not cover a {}x{} gradient",
				mask.dim(),
				height,
				width
			)));
		}
		let mut out = grad.clone();
		for ((_, _, y, x), value) in out.indexed_iter_mut() {
			if !mask[[y, x]] {
				*value = 0.0;
			}
		}
		Ok(out)
	}
}

impl fmt::Display for Dropout {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "dropout({},{})", self.keep_ratio.0, self.keep_ratio.1)
	}
}
