use std::fmt;

use ndarray::{Array4, Axis};
use rand::RngCore;

use super::parser::{range_arg, NoiseArg};
use super::region::sample_ratio;
use super::{trace_mismatch, NoiseLayer, NoiseTrace};
use crate::constants::noise::{BLUR_RADIUS_SIGMAS, MAX_BLUR_SIGMA};
use crate::error::{Result, WatermarkError};

/// Separable Gaussian blur with zero padding; `sigma` is fixed or drawn from `[min, max]` per call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianBlur {
	sigma: (f32, f32),
}

impl GaussianBlur {
	pub fn new(sigma: (f32, f32)) -> Self {
		Self { sigma }
	}

	pub fn from_args(args: &[NoiseArg]) -> Result<Box<dyn NoiseLayer>> {
		let sigma = match args {
			[NoiseArg::Number(sigma)] => (*sigma, *sigma),
			_ => range_arg("blur", args)?,
		};
		if !(sigma.0.is_finite() && sigma.1.is_finite() && sigma.0 > 0.0 && sigma.0 <= sigma.1) {
			return Err(WatermarkError::Configuration(format!(
				"blur sigma ({}, {}) must be positive with min <= max",
				sigma.0, sigma.1
			)));
		}
		if sigma.1 > MAX_BLUR_SIGMA {
			return Err(WatermarkError::Configuration(format!(
				"blur sigma {} exceeds the maximum of {}",
				sigma.1, MAX_BLUR_SIGMA
			)));
		}
		Ok(Box::new(Self::new(sigma)))
	}
}

/// Normalised 1D Gaussian covering `BLUR_RADIUS_SIGMAS` standard deviations on each side.
pub(crate) fn gaussian_kernel(sigma: f32) -> Vec<f32> {
	let radius = ((BLUR_RADIUS_SIGMAS * sigma).ceil() as usize).max(1);
	let weights: Vec<f32> = (0..=2 * radius)
		.map(|i| {
			let d = i as f32 - radius as f32;
			(-d * d / (2.0 * sigma * sigma)).exp()
		})
		.collect();
	let total: f32 = weights.iter().sum();
	weights.into_iter().map(|w| w / total).collect()
}

fn blur_axis(input: &Array4<f32>, kernel: &[f32], axis: Axis) -> Array4<f32> {
	let radius = (kernel.len() / 2) as isize;
	let mut out = Array4::zeros(input.raw_dim());
	for (src, mut dst) in input.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
		let len = src.len() as isize;
		for i in 0..len {
			let mut acc = 0.0;
			for (k, &w) in kernel.iter().enumerate() {
				let j = i + k as isize - radius;
				if j >= 0 && j < len {
					acc += w * src[j as usize];
				}
			}
			dst[i as usize] = acc;
		}
	}
	out
}

/// The kernel is symmetric and the padding is zero, so the operator is its own adjoint.
fn blur(input: &Array4<f32>, kernel: &[f32]) -> Array4<f32> {
	blur_axis(&blur_axis(input, kernel, Axis(2)), kernel, Axis(3))
}

impl NoiseLayer for GaussianBlur {
	fn name(&self) -> &'static str {
		"blur"
	}

	fn forward(
		&self,
		image: &Array4<f32>,
		_cover: &Array4<f32>,
		rng: &mut dyn RngCore,
	) -> Result<(Array4<f32>, NoiseTrace)> {
		let kernel = gaussian_kernel(sample_ratio(self.sigma, rng));
		Ok((blur(image, &kernel), NoiseTrace::Kernel(kernel)))
	}

	fn backward(&self, grad: &Array4<f32>, trace: &NoiseTrace) -> Result<Array4<f32>> {
		match trace {
			NoiseTrace::Kernel(kernel) => Ok(blur(grad, kernel)),
			other => Err(trace_mismatch("blur", other)),
		}
	}
}

impl fmt::Display for GaussianBlur {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		if self.sigma.0 == self.sigma.1 {
			write!(f, "blur({})", self.sigma.0)
		} else {
			write!(f, "blur({},{})", self.sigma.0, self.sigma.1)
		}
	}
}
