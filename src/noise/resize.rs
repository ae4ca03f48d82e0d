use std::fmt;

use ndarray::Array4;
use rand::RngCore;

use super::parser::{range_arg, NoiseArg};
use super::region::sample_ratio;
use super::{trace_mismatch, NoiseLayer, NoiseTrace};
use crate::error::{Result, WatermarkError};

/// Nearest-neighbour downscale by `r ~ U[min, max]` followed by an upscale back to the original size,
/// which destroys detail without changing the image shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resize {
	ratio: (f32, f32),
}

impl Resize {
	pub fn new(ratio: (f32, f32)) -> Self {
		Self { ratio }
	}

	pub fn from_args(args: &[NoiseArg]) -> Result<Box<dyn NoiseLayer>> {
		let (min, max) = range_arg("resize", args)?;
		if !(min > 0.0 && min <= max && max <= 1.0) {
			return Err(WatermarkError::Configuration(format!(
				"resize range ({}, {}) must satisfy 0 < min <= max <= 1",
				min, max
			)));
		}
		Ok(Box::new(Self::new((min, max))))
	}
}

/// For every output pixel along one axis, the input pixel it is copied from.
fn nearest_round_trip(size: usize, ratio: f32) -> Vec<usize> {
	let small = ((size as f32 * ratio).round() as usize).max(1).min(size);
	(0..size)
		.map(|i| {
			let down = (((i as f32 + 0.5) * small as f32 / size as f32) as usize).min(small - 1);
			(((down as f32 + 0.5) * size as f32 / small as f32) as usize).min(size - 1)
		})
		.collect()
}

impl NoiseLayer for Resize {
	fn name(&self) -> &'static str {
		"resize"
	}

	fn forward(
		&self,
		image: &Array4<f32>,
		_cover: &Array4<f32>,
		rng: &mut dyn RngCore,
	) -> Result<(Array4<f32>, NoiseTrace)> {
		let (batch, channels, height, width) = image.dim();
		let ratio = sample_ratio(self.ratio, rng);
		let rows = nearest_round_trip(height, ratio);
		let cols = nearest_round_trip(width, ratio);
		let out = Array4::from_shape_fn((batch, channels, height, width), |(n, c, y, x)| {
			image[[n, c, rows[y], cols[x]]]
		});
		Ok((out, NoiseTrace::Resample { rows, cols }))
	}

	/// Scatter-adds every output gradient onto the pixel it was copied from.
	fn backward(&self, grad: &Array4<f32>, trace: &NoiseTrace) -> Result<Array4<f32>> {
		let (rows, cols) = match trace {
			NoiseTrace::Resample { rows, cols } => (rows, cols),
			other => return Err(trace_mismatch("resize", other)),
		};
		let (_, _, height, width) = grad.dim();
		if rows.len() != height || cols.len() != width {
			return Err(WatermarkError::ShapeMismatch(format!(
				"resize trace covers {}x{}, gradient is {}x{}",
				rows.len(),
				cols.len(),
				height,
				width
			)));
		}
		let mut out = Array4::zeros(grad.raw_dim());
		for ((n, c, y, x), &g) in grad.indexed_iter() {
			out[[n, c, rows[y], cols[x]]] += g;
		}
		Ok(out)
	}
}

impl fmt::Display for Resize {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "resize({},{})", self.ratio.0, self.ratio.1)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::StdRng;
	use rand::{Rng, SeedableRng};

	#[test]
	fn full_ratio_is_identity() {
		assert_eq!(nearest_round_trip(7, 1.0), (0..7).collect::<Vec<_>>());
	}

	#[test]
	fn half_ratio_duplicates_pixels() {
		let rows = nearest_round_trip(8, 0.5);
		assert_eq!(rows.len(), 8);
		let distinct: std::collections::BTreeSet<_> = rows.iter().collect();
		assert_eq!(distinct.len(), 4);
	}

	#[test]
	fn backward_is_the_adjoint_of_forward() {
		let mut rng = StdRng::seed_from_u64(91);
		let resize = Resize::new((0.3, 0.7));
		let x = Array4::from_shape_fn((2, 3, 10, 12), |_| rng.gen_range(-1.0..1.0));
		let y = Array4::from_shape_fn((2, 3, 10, 12), |_| rng.gen_range(-1.0..1.0));
		let (fx, trace) = resize.forward(&x, &x, &mut rng).unwrap();
		let aty = resize.backward(&y, &trace).unwrap();
		let lhs = (&fx * &y).sum();
		let rhs = (&x * &aty).sum();
		assert!((lhs - rhs).abs() < 1e-3);
	}
}
