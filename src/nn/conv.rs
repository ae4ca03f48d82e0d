use ndarray::{Array1, Array2, Array3, Array4, ArrayView2, ArrayView3, Axis, Ix1};
use rand::Rng;

use super::{missing_cache, Activation, ActivationKind, GradMode, Module, Param};
use crate::error::{Result, WatermarkError};

/// Unfolds every receptive field of a `[C, H, W]` image into a column.
///
/// Rows are ordered `(channel, ky, kx)`, columns `(oy, ox)`. Taps falling into the zero padding are left at 0.
pub(crate) fn im2col(
	image: ArrayView3<f32>,
	kernel: usize,
	stride: usize,
	padding: usize,
	out_h: usize,
	out_w: usize,
) -> Array2<f32> {
	let (channels, height, width) = image.dim();
	let mut cols = Array2::zeros((channels * kernel * kernel, out_h * out_w));
	for c in 0..channels {
		for ky in 0..kernel {
			for kx in 0..kernel {
				let row = (c * kernel + ky) * kernel + kx;
				let mut col_row = cols.row_mut(row);
				for oy in 0..out_h {
					let iy = (oy * stride + ky) as isize - padding as isize;
					if iy < 0 || iy >= height as isize {
						continue;
					}
					for ox in 0..out_w {
						let ix = (ox * stride + kx) as isize - padding as isize;
						if ix < 0 || ix >= width as isize {
							continue;
						}
						col_row[oy * out_w + ox] = image[[c, iy as usize, ix as usize]];
					}
				}
			}
		}
	}
	cols
}

/// Adjoint of [`im2col`]: folds columns back into a `[C, H, W]` image, summing overlapping taps.
#[allow(clippy::too_many_arguments)]
pub(crate) fn col2im(
	cols: ArrayView2<f32>,
	channels: usize,
	height: usize,
	width: usize,
	kernel: usize,
	stride: usize,
	padding: usize,
	out_h: usize,
	out_w: usize,
) -> Array3<f32> {
	let mut image = Array3::zeros((channels, height, width));
	for c in 0..channels {
		for ky in 0..kernel {
			for kx in 0..kernel {
				let row = (c * kernel + ky) * kernel + kx;
				let col_row = cols.row(row);
				for oy in 0..out_h {
					let iy = (oy * stride + ky) as isize - padding as isize;
					if iy < 0 || iy >= height as isize {
						continue;
					}
					for ox in 0..out_w {
						let ix = (ox * stride + kx) as isize - padding as isize;
						if ix < 0 || ix >= width as isize {
							continue;
						}
						image[[c, iy as usize, ix as usize]] += col_row[oy * out_w + ox];
					}
				}
			}
		}
	}
	image
}

/// 2D convolution over `[N, C, H, W]` tensors with square kernels and symmetric zero padding.
#[derive(Debug, Clone)]
pub struct Conv2d {
	weight: Param,
	bias: Param,
	in_channels: usize,
	out_channels: usize,
	kernel: usize,
	stride: usize,
	padding: usize,
	input: Option<Array4<f32>>,
}

impl Conv2d {
	pub fn new<R: Rng + ?Sized>(
		in_channels: usize,
		out_channels: usize,
		kernel: usize,
		stride: usize,
		padding: usize,
		rng: &mut R,
	) -> Self {
		let fan_in = in_channels * kernel * kernel;
		Self {
			weight: Param::he_normal(&[out_channels, in_channels, kernel, kernel], fan_in, rng),
			bias: Param::zeros(&[out_channels]),
			in_channels,
			out_channels,
			kernel,
			stride: stride.max(1),
			padding,
			input: None,
		}
	}

	pub fn in_channels(&self) -> usize {
		self.in_channels
	}

	pub fn out_channels(&self) -> usize {
		self.out_channels
	}

	pub fn output_dims(&self, height: usize, width: usize) -> Result<(usize, usize)> {
		let padded_h = height + 2 * self.padding;
		let padded_w = width + 2 * self.padding;
		if padded_h < self.kernel || padded_w < self.kernel {
			return Err(WatermarkError::ShapeMismatch(format!(
				"{}x{} input is smaller than the {}x{} kernel",
				height, width, self.kernel, self.kernel
			)));
		}
		Ok((
			(padded_h - self.kernel) / self.stride + 1,
			(padded_w - self.kernel) / self.stride + 1,
		))
	}

	pub fn forward(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
		let (batch, channels, height, width) = input.dim();
		if channels != self.in_channels {
			return Err(WatermarkError::ShapeMismatch(format!(
				"Conv2d expects {} input channels, got {}",
				self.in_channels, channels
			)));
		}
		let (out_h, out_w) = self.output_dims(height, width)?;
		let weights = self
			.weight
			.value
			.view()
			.into_shape((self.out_channels, channels * self.kernel * self.kernel))?;
		let bias = self.bias.value.view().into_dimensionality::<Ix1>()?;

		let mut output = Array4::zeros((batch, self.out_channels, out_h, out_w));
		for (image, mut out) in input.outer_iter().zip(output.outer_iter_mut()) {
			let cols = im2col(image, self.kernel, self.stride, self.padding, out_h, out_w);
			let mut result = weights.dot(&cols);
			result += &bias.insert_axis(Axis(1));
			out.assign(&result.into_shape((self.out_channels, out_h, out_w))?);
		}
		self.input = Some(input.clone());
		Ok(output)
	}

	pub fn backward(&mut self, grad: &Array4<f32>, mode: GradMode) -> Result<Array4<f32>> {
		let input = self.input.as_ref().ok_or_else(|| missing_cache("Conv2d"))?;
		let (batch, channels, height, width) = input.dim();
		let (out_h, out_w) = self.output_dims(height, width)?;
		if grad.dim() != (batch, self.out_channels, out_h, out_w) {
			return Err(WatermarkError::ShapeMismatch(format!(
				"Conv2d gradient has shape {:?}, expected {:?}",
				grad.dim(),
				(batch, self.out_channels, out_h, out_w)
			)));
		}
		let patch = channels * self.kernel * self.kernel;
		let weights = self.weight.value.view().into_shape((self.out_channels, patch))?;
		let grad = grad.as_standard_layout();

		let mut grad_input = Array4::zeros((batch, channels, height, width));
		let mut grad_weights = Array2::<f32>::zeros((self.out_channels, patch));
		let mut grad_bias = Array1::<f32>::zeros(self.out_channels);
		for i in 0..batch {
			let g = grad.index_axis(Axis(0), i).into_shape((self.out_channels, out_h * out_w))?;
			if mode == GradMode::Accumulate {
				let cols = im2col(
					input.index_axis(Axis(0), i),
					self.kernel,
					self.stride,
					self.padding,
					out_h,
					out_w,
				);
				grad_weights += &g.dot(&cols.t());
				grad_bias += &g.sum_axis(Axis(1));
			}
			let grad_cols = weights.t().dot(&g);
			let folded = col2im(
				grad_cols.view(),
				channels,
				height,
				width,
				self.kernel,
				self.stride,
				self.padding,
				out_h,
				out_w,
			);
			grad_input.index_axis_mut(Axis(0), i).assign(&folded);
		}

		if mode == GradMode::Accumulate {
			self.weight.grad += &grad_weights.into_shape(self.weight.value.raw_dim())?;
			self.bias.grad += &grad_bias.into_dyn();
		}
		Ok(grad_input)
	}
}

impl Module for Conv2d {
	fn params(&self) -> Vec<&Param> {
		vec![&self.weight, &self.bias]
	}

	fn params_mut(&mut self) -> Vec<&mut Param> {
		vec![&mut self.weight, &mut self.bias]
	}
}

/// Transposed convolution (fractionally strided), the adjoint of [`Conv2d`] in its spatial mapping.
///
/// Weights are stored `[in, out, k, k]`; the output size is `(h - 1) * stride - 2 * padding + kernel`.
#[derive(Debug, Clone)]
pub struct ConvTranspose2d {
	weight: Param,
	bias: Param,
	in_channels: usize,
	out_channels: usize,
	kernel: usize,
	stride: usize,
	padding: usize,
	input: Option<Array4<f32>>,
}

impl ConvTranspose2d {
	pub fn new<R: Rng + ?Sized>(
		in_channels: usize,
		out_channels: usize,
		kernel: usize,
		stride: usize,
		padding: usize,
		rng: &mut R,
	) -> Self {
		let fan_in = in_channels * kernel * kernel;
		Self {
			weight: Param::he_normal(&[in_channels, out_channels, kernel, kernel], fan_in, rng),
			bias: Param::zeros(&[out_channels]),
			in_channels,
			out_channels,
			kernel,
			stride: stride.max(1),
			padding,
			input: None,
		}
	}

	pub fn output_dims(&self, height: usize, width: usize) -> Result<(usize, usize)> {
		let span = |size: usize| (size.max(1) - 1) * self.stride + self.kernel;
		let (span_h, span_w) = (span(height), span(width));
		if height == 0 || width == 0 || span_h <= 2 * self.padding || span_w <= 2 * self.padding {
			return Err(WatermarkError::ShapeMismatch(format!(
				"{}x{} input is too small for a transposed convolution with padding {}",
				height, width, self.padding
			)));
		}
		Ok((span_h - 2 * self.padding, span_w - 2 * self.padding))
	}

	pub fn forward(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
		let (batch, channels, height, width) = input.dim();
		if channels != self.in_channels {
			return Err(WatermarkError::ShapeMismatch(format!(
				"ConvTranspose2d expects {} input channels, got {}",
				self.in_channels, channels
			)));
		}
		let (out_h, out_w) = self.output_dims(height, width)?;
		let patch = self.out_channels * self.kernel * self.kernel;
		let weights = self.weight.value.view().into_shape((self.in_channels, patch))?;
		let bias = self.bias.value.view().into_dimensionality::<Ix1>()?;
		let input_std = input.as_standard_layout();

		let mut output = Array4::zeros((batch, self.out_channels, out_h, out_w));
		for (image, mut out) in input_std.outer_iter().zip(output.outer_iter_mut()) {
			let flat = image.into_shape((channels, height * width))?;
			let cols = weights.t().dot(&flat);
			let mut folded = col2im(
				cols.view(),
				self.out_channels,
				out_h,
				out_w,
				self.kernel,
				self.stride,
				self.padding,
				height,
				width,
			);
			folded += &bias.insert_axis(Axis(1)).insert_axis(Axis(2));
			out.assign(&folded);
		}
		self.input = Some(input.clone());
		Ok(output)
	}

	pub fn backward(&mut self, grad: &Array4<f32>, mode: GradMode) -> Result<Array4<f32>> {
		let input = self.input.as_ref().ok_or_else(|| missing_cache("ConvTranspose2d"))?;
		let (batch, channels, height, width) = input.dim();
		let (out_h, out_w) = self.output_dims(height, width)?;
		if grad.dim() != (batch, self.out_channels, out_h, out_w) {
			return Err(WatermarkError::ShapeMismatch(format!(
				"ConvTranspose2d gradient has shape {:?}, expected {:?}",
				grad.dim(),
				(batch, self.out_channels, out_h, out_w)
			)));
		}
		let patch = self.out_channels * self.kernel * self.kernel;
		let weights = self.weight.value.view().into_shape((self.in_channels, patch))?;

		let mut grad_input = Array4::zeros((batch, channels, height, width));
		let mut grad_weights = Array2::<f32>::zeros((self.in_channels, patch));
		let mut grad_bias = Array1::<f32>::zeros(self.out_channels);
		for i in 0..batch {
			let g = grad.index_axis(Axis(0), i);
			let grad_cols = im2col(g, self.kernel, self.stride, self.padding, height, width);
			let grad_flat = weights.dot(&grad_cols);
			grad_input
				.index_axis_mut(Axis(0), i)
				.assign(&grad_flat.into_shape((channels, height, width))?);
			if mode == GradMode::Accumulate {
				let image = input.index_axis(Axis(0), i).to_owned();
				let flat = image.into_shape((channels, height * width))?;
				grad_weights += &flat.dot(&grad_cols.t());
				grad_bias += &g.sum_axis(Axis(2)).sum_axis(Axis(1));
			}
		}

		if mode == GradMode::Accumulate {
			self.weight.grad += &grad_weights.into_shape(self.weight.value.raw_dim())?;
			self.bias.grad += &grad_bias.into_dyn();
		}
		Ok(grad_input)
	}
}

impl Module for ConvTranspose2d {
	fn params(&self) -> Vec<&Param> {
		vec![&self.weight, &self.bias]
	}

	fn params_mut(&mut self) -> Vec<&mut Param> {
		vec![&mut self.weight, &mut self.bias]
	}
}

/// 3x3 convolution followed by ReLU, the basic block of the HiDDeN-style networks.
#[derive(Debug, Clone)]
pub struct ConvBlock {
	conv: Conv2d,
	activation: Activation,
}

impl ConvBlock {
	pub fn new<R: Rng + ?Sized>(in_channels: usize, out_channels: usize, stride: usize, rng: &mut R) -> Self {
		Self {
			conv: Conv2d::new(in_channels, out_channels, 3, stride, 1, rng),
			activation: Activation::new(ActivationKind::Relu),
		}
	}

	pub fn out_channels(&self) -> usize {
		self.conv.out_channels()
	}

	pub fn forward(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
		let features = self.conv.forward(input)?;
		Ok(self.activation.forward(&features))
	}

	pub fn backward(&mut self, grad: &Array4<f32>, mode: GradMode) -> Result<Array4<f32>> {
		let grad = self.activation.backward(grad)?;
		self.conv.backward(&grad, mode)
	}
}

impl Module for ConvBlock {
	fn params(&self) -> Vec<&Param> {
		self.conv.params()
	}

	fn params_mut(&mut self) -> Vec<&mut Param> {
		self.conv.params_mut()
	}
}
