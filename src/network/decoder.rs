use ndarray::{Array2, Array4};
use rand::Rng;

use crate::constants::network::CHANNELS;
use crate::error::Result;
use crate::nn::{ConvBlock, GlobalAvgPool, GradMode, Linear, Module, Param};

/// Recovers the message from a (noised) image: conv blocks, a block down to `L` channels, global
/// average pooling and a final `L -> L` linear layer.
#[derive(Debug, Clone)]
pub struct Decoder {
	blocks: Vec<ConvBlock>,
	to_message: ConvBlock,
	pool: GlobalAvgPool,
	linear: Linear,
}

impl Decoder {
	pub fn new<R: Rng + ?Sized>(message_length: usize, blocks: usize, channels: usize, rng: &mut R) -> Self {
		let mut layers = Vec::with_capacity(blocks);
		layers.push(ConvBlock::new(CHANNELS, channels, 1, rng));
		for _ in 1..blocks {
			layers.push(ConvBlock::new(channels, channels, 1, rng));
		}
		Self {
			blocks: layers,
			to_message: ConvBlock::new(channels, message_length, 1, rng),
			pool: GlobalAvgPool::new(),
			linear: Linear::new(message_length, message_length, rng),
		}
	}

	pub fn message_length(&self) -> usize {
		self.linear.out_features()
	}

	/// `[N, 3, H, W] -> [N, L]`
	pub fn forward(&mut self, image: &Array4<f32>) -> Result<Array2<f32>> {
		let mut features = image.clone();
		for block in &mut self.blocks {
			features = block.forward(&features)?;
		}
		let features = self.to_message.forward(&features)?;
		let pooled = self.pool.forward(&features);
		self.linear.forward(&pooled)
	}

	pub fn backward(&mut self, grad: &Array2<f32>, mode: GradMode) -> Result<Array4<f32>> {
		let grad = self.linear.backward(grad, mode)?;
		let grad = self.pool.backward(&grad)?;
		let mut grad = self.to_message.backward(&grad, mode)?;
		for block in self.blocks.iter_mut().rev() {
			grad = block.backward(&grad, mode)?;
		}
		Ok(grad)
	}
}

impl Module for Decoder {
	fn params(&self) -> Vec<&Param> {
		let mut params: Vec<&Param> = self.blocks.iter().flat_map(|b| b.params()).collect();
		params.extend(self.to_message.params());
		params.extend(self.linear.params());
		params
	}

	fn params_mut(&mut self) -> Vec<&mut Param> {
		let mut params: Vec<&mut Param> = self.blocks.iter_mut().flat_map(|b| b.params_mut()).collect();
		params.extend(self.to_message.params_mut());
		params.extend(self.linear.params_mut());
		params
	}
}
