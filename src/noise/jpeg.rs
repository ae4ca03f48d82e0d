//! Differentiable JPEG approximation ("JPEG-Mask"): images are moved to YUV, transformed with an
//! orthonormal 8x8 block DCT, and every coefficient outside the low-frequency corner is dropped
//! (5x5 for luma, 3x3 for chroma) before transforming back.
//!
//! Every step is linear, so the backward pass is the exact adjoint: the colour matrices are
//! transposed and the masked DCT round trip, being symmetric, is reused as is.

use std::f32::consts::PI;
use std::fmt;

use ndarray::{s, Array2, Array3, Array4, ArrayView2, ArrayView3, Axis};
use rand::RngCore;

use super::parser::{no_args, NoiseArg};
use super::{NoiseLayer, NoiseTrace};
use crate::constants::noise::{JPEG_BLOCK, JPEG_KEEP_CHROMA, JPEG_KEEP_LUMA};
use crate::error::{Result, WatermarkError};

type ColorMatrix = [[f32; 3]; 3];

const RGB_TO_YUV: ColorMatrix = [
	[0.299, 0.587, 0.114],
	[-0.14713, -0.28886, 0.436],
	[0.615, -0.51499, -0.10001],
];

const YUV_TO_RGB: ColorMatrix = [
	[1.0, 0.0, 1.13983],
	[1.0, -0.39465, -0.58060],
	[1.0, 2.03211, 0.0],
];

fn transpose(m: &ColorMatrix) -> ColorMatrix {
	let mut t = [[0.0; 3]; 3];
	for (i, row) in m.iter().enumerate() {
		for (j, &v) in row.iter().enumerate() {
			t[j][i] = v;
		}
	}
	t
}

fn mix_channels(image: ArrayView3<f32>, matrix: &ColorMatrix) -> Array3<f32> {
	let mut out = Array3::zeros(image.raw_dim());
	for (i, row) in matrix.iter().enumerate() {
		let mut target = out.index_axis_mut(Axis(0), i);
		for (j, &weight) in row.iter().enumerate() {
			target.scaled_add(weight, &image.index_axis(Axis(0), j));
		}
	}
	out
}

/// Orthonormal DCT-II basis, `basis[[k, n]]`.
fn dct_basis() -> Array2<f32> {
	let n = JPEG_BLOCK as f32;
	Array2::from_shape_fn((JPEG_BLOCK, JPEG_BLOCK), |(k, i)| {
		let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
		scale * ((2.0 * i as f32 + 1.0) * k as f32 * PI / (2.0 * n)).cos()
	})
}

#[derive(Debug, Clone)]
pub struct JpegMask {
	basis: Array2<f32>,
}

impl Default for JpegMask {
	fn default() -> Self {
		Self { basis: dct_basis() }
	}
}

impl JpegMask {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_args(args: &[NoiseArg]) -> Result<Box<dyn NoiseLayer>> {
		no_args("jpeg", args)?;
		Ok(Box::new(Self::new()))
	}

	/// Zero-pads a plane to whole blocks, keeps the `keep x keep` lowest frequencies of every block
	/// and crops back.
	fn low_pass(&self, plane: ArrayView2<f32>, keep: usize) -> Array2<f32> {
		let (height, width) = plane.dim();
		let padded_h = (height + JPEG_BLOCK - 1) / JPEG_BLOCK * JPEG_BLOCK;
		let padded_w = (width + JPEG_BLOCK - 1) / JPEG_BLOCK * JPEG_BLOCK;
		let mut padded = Array2::zeros((padded_h, padded_w));
		padded.slice_mut(s![..height, ..width]).assign(&plane);

		for by in (0..padded_h).step_by(JPEG_BLOCK) {
			for bx in (0..padded_w).step_by(JPEG_BLOCK) {
				let mut block = padded.slice_mut(s![by..by + JPEG_BLOCK, bx..bx + JPEG_BLOCK]);
				let mut coefficients = self.basis.dot(&block).dot(&self.basis.t());
				for ((ky, kx), c) in coefficients.indexed_iter_mut() {
					if ky >= keep || kx >= keep {
						*c = 0.0;
					}
				}
				block.assign(&self.basis.t().dot(&coefficients).dot(&self.basis));
			}
		}
		padded.slice(s![..height, ..width]).to_owned()
	}

	fn apply(&self, input: &Array4<f32>, before: &ColorMatrix, after: &ColorMatrix) -> Result<Array4<f32>> {
		let (_, channels, _, _) = input.dim();
		if channels != 3 {
			return Err(WatermarkError::ShapeMismatch(format!(
				"jpeg expects 3 channel images, got {}",
				channels
			)));
		}
		let mut out = Array4::zeros(input.raw_dim());
		for (image, mut target) in input.outer_iter().zip(out.outer_iter_mut()) {
			let mut planes = mix_channels(image, before);
			for (c, mut plane) in planes.outer_iter_mut().enumerate() {
				let keep = if c == 0 { JPEG_KEEP_LUMA } else { JPEG_KEEP_CHROMA };
				let filtered = self.low_pass(plane.view(), keep);
				plane.assign(&filtered);
			}
			target.assign(&mix_channels(planes.view(), after));
		}
		Ok(out)
	}
}

impl NoiseLayer for JpegMask {
	fn name(&self) -> &'static str {
		"jpeg"
	}

	fn forward(
		&self,
		image: &Array4<f32>,
		_cover: &Array4<f32>,
		_rng: &mut dyn RngCore,
	) -> Result<(Array4<f32>, NoiseTrace)> {
		Ok((self.apply(image, &RGB_TO_YUV, &YUV_TO_RGB)?, NoiseTrace::Stateless))
	}

	fn backward(&self, grad: &Array4<f32>, _trace: &NoiseTrace) -> Result<Array4<f32>> {
		self.apply(grad, &transpose(&YUV_TO_RGB), &transpose(&RGB_TO_YUV))
	}
}

impl fmt::Display for JpegMask {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "jpeg()")
	}
}
