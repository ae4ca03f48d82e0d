use ndarray::{concatenate, s, Array2, Array4, Axis};
use rand::Rng;

use crate::constants::network::CHANNELS;
use crate::error::{Result, WatermarkError};
use crate::message::MessageExpander;
use crate::nn::{Conv2d, ConvBlock, GradMode, Module, Param};

/// HiDDeN convolutional encoder.
///
/// The cover is run through `blocks` conv blocks, the spatially expanded message and the cover itself are
/// concatenated to the features, and a final conv block plus 1x1 convolution produce the watermarked image.
#[derive(Debug, Clone)]
pub struct HiddenEncoder {
	blocks: Vec<ConvBlock>,
	after_concat: ConvBlock,
	final_layer: Conv2d,
	expander: MessageExpander,
	channels: usize,
}

impl HiddenEncoder {
	pub fn new<R: Rng + ?Sized>(message_length: usize, blocks: usize, channels: usize, rng: &mut R) -> Self {
		let mut layers = Vec::with_capacity(blocks);
		layers.push(ConvBlock::new(CHANNELS, channels, 1, rng));
		for _ in 1..blocks {
			layers.push(ConvBlock::new(channels, channels, 1, rng));
		}
		Self {
			blocks: layers,
			after_concat: ConvBlock::new(message_length + channels + CHANNELS, channels, 1, rng),
			final_layer: Conv2d::new(channels, CHANNELS, 1, 1, 0, rng),
			expander: MessageExpander::new(message_length),
			channels,
		}
	}

	pub fn forward(&mut self, image: &Array4<f32>, message: &Array2<f32>) -> Result<Array4<f32>> {
		let (_, _, height, width) = image.dim();
		let mut features = image.clone();
		for block in &mut self.blocks {
			features = block.forward(&features)?;
		}
		let expanded = self.expander.expand(message.view(), height, width)?;
		let concat = concatenate(Axis(1), &[expanded.view(), features.view(), image.view()])?;
		let hidden = self.after_concat.forward(&concat)?;
		self.final_layer.forward(&hidden)
	}

	/// Back-propagates into the encoder parameters and returns the gradient with respect to the cover.
	pub fn backward(&mut self, grad: &Array4<f32>, mode: GradMode) -> Result<Array4<f32>> {
		let grad = self.final_layer.backward(grad, mode)?;
		let grad = self.after_concat.backward(&grad, mode)?;
		let length = self.expander.length();
		if grad.shape()[1] != length + self.channels + CHANNELS {
			return Err(WatermarkError::ShapeMismatch(format!(
				"encoder concat gradient has {} channels",
				grad.shape()[1]
			)));
		}
		let mut grad_features = grad.slice(s![.., length..length + self.channels, .., ..]).to_owned();
		for block in self.blocks.iter_mut().rev() {
			grad_features = block.backward(&grad_features, mode)?;
		}
		grad_features += &grad.slice(s![.., length + self.channels.., .., ..]);
		Ok(grad_features)
	}
}

impl Module for HiddenEncoder {
	fn params(&self) -> Vec<&Param> {
		let mut params: Vec<&Param> = self.blocks.iter().flat_map(|b| b.params()).collect();
		params.extend(self.after_concat.params());
		params.extend(self.final_layer.params());
		params
	}

	fn params_mut(&mut self) -> Vec<&mut Param> {
		let mut params: Vec<&mut Param> = self.blocks.iter_mut().flat_map(|b| b.params_mut()).collect();
		params.extend(self.after_concat.params_mut());
		params.extend(self.final_layer.params_mut());
		params
	}
}
