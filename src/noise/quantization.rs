use std::fmt;

use ndarray::Array4;
use rand::RngCore;

use super::parser::{no_args, NoiseArg};
use super::{NoiseLayer, NoiseTrace};
use crate::constants::noise::QUANTIZATION_LEVELS;
use crate::error::Result;

/// Snaps `[-1, 1]` pixel values onto the 8-bit grid. Rounding has no useful derivative, so the
/// gradient passes straight through.
#[derive(Debug, Clone, Copy, Default)]
pub struct Quantization;

impl Quantization {
	pub fn from_args(args: &[NoiseArg]) -> Result<Box<dyn NoiseLayer>> {
		no_args("quantization", args)?;
		Ok(Box::new(Quantization))
	}
}

impl NoiseLayer for Quantization {
	fn name(&self) -> &'static str {
		"quantization"
	}

	fn forward(
		&self,
		image: &Array4<f32>,
		_cover: &Array4<f32>,
		_rng: &mut dyn RngCore,
	) -> Result<(Array4<f32>, NoiseTrace)> {
		let half = QUANTIZATION_LEVELS / 2.0;
		let quantized = image.mapv(|x| ((x.max(-1.0).min(1.0) + 1.0) * half).round() / half - 1.0);
		Ok((quantized, NoiseTrace::Stateless))
	}

	fn backward(&self, grad: &Array4<f32>, _trace: &NoiseTrace) -> Result<Array4<f32>> {
		Ok(grad.clone())
	}
}

impl fmt::Display for Quantization {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "quantization()")
	}
}
