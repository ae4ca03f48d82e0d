//! U-Net generator with the message injected at every resolution.
//!
//! The network is an owned recursive tree: each [`UnetBlock`] downsamples its input (concatenated with
//! the expanded message), hands the result to its inner block, upsamples what comes back and, except for
//! the outermost block, concatenates its own input as a skip connection.
//!
//! ```text
//! x ----------------------- identity ----------------------- x
//!   |-- [x, msg] -- down -- |inner block| -- up --|
//! ```

use ndarray::{concatenate, s, Array2, Array4, Axis};
use rand::Rng;

use crate::constants::network::{CHANNELS, LEAKY_RELU_SLOPE, MIN_UNET_DOWN_BLOCKS};
use crate::error::{Result, WatermarkError};
use crate::message::MessageExpander;
use crate::nn::{Activation, ActivationKind, Conv2d, ConvTranspose2d, GradMode, Module, Param};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPosition {
	Outermost,
	Middle,
	Innermost,
}

#[derive(Debug, Clone)]
pub struct UnetBlock {
	position: BlockPosition,
	input_channels: usize,
	output_channels: usize,
	down_activation: Option<Activation>,
	down_conv: Conv2d,
	inner: Option<Box<UnetBlock>>,
	up_activation: Activation,
	up_conv: ConvTranspose2d,
	output_activation: Option<Activation>,
	expander: MessageExpander,
}

impl UnetBlock {
	/// `input_channels` excludes the message channels, which every block appends itself.
	#[allow(clippy::too_many_arguments)]
	pub fn new<R: Rng + ?Sized>(
		position: BlockPosition,
		outer_channels: usize,
		inner_channels: usize,
		input_channels: usize,
		inner: Option<UnetBlock>,
		message_length: usize,
		rng: &mut R,
	) -> Self {
		let up_input = match position {
			BlockPosition::Innermost => inner_channels,
			_ => inner_channels * 2,
		};
		let down_activation = match position {
			BlockPosition::Outermost => None,
			_ => Some(Activation::new(ActivationKind::LeakyRelu(LEAKY_RELU_SLOPE))),
		};
		let output_activation = match position {
			BlockPosition::Outermost => Some(Activation::new(ActivationKind::Tanh)),
			_ => None,
		};
		Self {
			position,
			input_channels,
			output_channels: outer_channels,
			down_activation,
			down_conv: Conv2d::new(input_channels + message_length, inner_channels, 4, 2, 1, rng),
			inner: inner.map(Box::new),
			up_activation: Activation::new(ActivationKind::Relu),
			up_conv: ConvTranspose2d::new(up_input, outer_channels, 4, 2, 1, rng),
			output_activation,
			expander: MessageExpander::new(message_length),
		}
	}

	pub fn position(&self) -> BlockPosition {
		self.position
	}

	pub fn inner(&self) -> Option<&UnetBlock> {
		self.inner.as_deref()
	}

	/// Number of blocks in this subtree, i.e. the number of downsamplings it performs.
	pub fn depth(&self) -> usize {
		1 + self.inner.as_ref().map_or(0, |inner| inner.depth())
	}

	pub fn forward(&mut self, x: &Array4<f32>, message: &Array2<f32>) -> Result<Array4<f32>> {
		let (_, _, height, width) = x.dim();
		let expanded = self.expander.expand(message.view(), height, width)?;
		let mut down = concatenate(Axis(1), &[x.view(), expanded.view()])?;
		if let Some(activation) = &mut self.down_activation {
			down = activation.forward(&down);
		}
		down = self.down_conv.forward(&down)?;
		if let Some(inner) = &mut self.inner {
			down = inner.forward(&down, message)?;
		}
		let mut up = self.up_activation.forward(&down);
		up = self.up_conv.forward(&up)?;
		if let Some(activation) = &mut self.output_activation {
			up = activation.forward(&up);
		}
		match self.position {
			BlockPosition::Outermost => Ok(up),
			_ => Ok(concatenate(Axis(1), &[up.view(), x.view()])?),
		}
	}

	/// Returns the gradient with respect to `x`; the message receives no gradient.
	pub fn backward(&mut self, grad: &Array4<f32>, mode: GradMode) -> Result<Array4<f32>> {
		let outer = self.output_channels;
		let (mut grad_up, grad_skip) = match self.position {
			BlockPosition::Outermost => (grad.clone(), None),
			_ => {
				if grad.shape()[1] != outer + self.input_channels {
					return Err(WatermarkError::ShapeMismatch(format!(
						"U-Net block gradient has {} channels, expected {}",
						grad.shape()[1],
						outer + self.input_channels
					)));
				}
				(
					grad.slice(s![.., ..outer, .., ..]).to_owned(),
					Some(grad.slice(s![.., outer.., .., ..])),
				)
			}
		};
		if let Some(activation) = &mut self.output_activation {
			grad_up = activation.backward(&grad_up)?;
		}
		let mut grad_down = self.up_conv.backward(&grad_up, mode)?;
		grad_down = self.up_activation.backward(&grad_down)?;
		if let Some(inner) = &mut self.inner {
			grad_down = inner.backward(&grad_down, mode)?;
		}
		grad_down = self.down_conv.backward(&grad_down, mode)?;
		if let Some(activation) = &mut self.down_activation {
			grad_down = activation.backward(&grad_down)?;
		}

		let mut grad_x = grad_down.slice(s![.., ..self.input_channels, .., ..]).to_owned();
		if let Some(skip) = grad_skip {
			grad_x += &skip;
		}
		Ok(grad_x)
	}
}

impl Module for UnetBlock {
	fn params(&self) -> Vec<&Param> {
		let mut params = self.down_conv.params();
		if let Some(inner) = &self.inner {
			params.extend(inner.params());
		}
		params.extend(self.up_conv.params());
		params
	}

	fn params_mut(&mut self) -> Vec<&mut Param> {
		let mut params = self.down_conv.params_mut();
		if let Some(inner) = &mut self.inner {
			params.extend(inner.params_mut());
		}
		params.extend(self.up_conv.params_mut());
		params
	}
}

/// Encoder wrapping the U-Net tree. With `down_blocks` levels a `2^down_blocks` image reaches 1x1 at
/// the bottleneck.
#[derive(Debug, Clone)]
pub struct UnetEncoder {
	root: UnetBlock,
}

impl UnetEncoder {
	pub fn new<R: Rng + ?Sized>(
		message_length: usize,
		filters: usize,
		down_blocks: usize,
		image_size: usize,
		rng: &mut R,
	) -> Result<Self> {
		if down_blocks < MIN_UNET_DOWN_BLOCKS {
			return Err(WatermarkError::ShapeMismatch(format!(
				"U-Net needs at least {} down blocks, got {}",
				MIN_UNET_DOWN_BLOCKS, down_blocks
			)));
		}
		let factor = 1usize.checked_shl(down_blocks as u32).unwrap_or(0);
		if factor == 0 || image_size % factor != 0 {
			return Err(WatermarkError::ShapeMismatch(format!(
				"image size {} is not divisible by 2^{} required by the U-Net encoder",
				image_size, down_blocks
			)));
		}

		let ngf = filters;
		let l = message_length;
		let mut block = UnetBlock::new(BlockPosition::Innermost, ngf * 8, ngf * 8, ngf * 8, None, l, rng);
		for _ in 0..down_blocks - MIN_UNET_DOWN_BLOCKS {
			block = UnetBlock::new(BlockPosition::Middle, ngf * 8, ngf * 8, ngf * 8, Some(block), l, rng);
		}
		block = UnetBlock::new(BlockPosition::Middle, ngf * 4, ngf * 8, ngf * 4, Some(block), l, rng);
		block = UnetBlock::new(BlockPosition::Middle, ngf * 2, ngf * 4, ngf * 2, Some(block), l, rng);
		block = UnetBlock::new(BlockPosition::Middle, ngf, ngf * 2, ngf, Some(block), l, rng);
		let root = UnetBlock::new(BlockPosition::Outermost, CHANNELS, ngf, CHANNELS, Some(block), l, rng);
		Ok(Self { root })
	}

	pub fn root(&self) -> &UnetBlock {
		&self.root
	}

	pub fn forward(&mut self, image: &Array4<f32>, message: &Array2<f32>) -> Result<Array4<f32>> {
		self.root.forward(image, message)
	}

	pub fn backward(&mut self, grad: &Array4<f32>, mode: GradMode) -> Result<Array4<f32>> {
		self.root.backward(grad, mode)
	}
}

impl Module for UnetEncoder {
	fn params(&self) -> Vec<&Param> {
		self.root.params()
	}

	fn params_mut(&mut self) -> Vec<&mut Param> {
		self.root.params_mut()
	}
}
