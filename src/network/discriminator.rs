use ndarray::{Array2, Array4};
use rand::Rng;

use crate::constants::network::CHANNELS;
use crate::error::Result;
use crate::nn::{ConvBlock, GlobalAvgPool, GradMode, Linear, Module, Param};

/// Scores images with one logit each; positive means "looks like a cover".
#[derive(Debug, Clone)]
pub struct Discriminator {
	blocks: Vec<ConvBlock>,
	pool: GlobalAvgPool,
	linear: Linear,
}

impl Discriminator {
	pub fn new<R: Rng + ?Sized>(blocks: usize, channels: usize, rng: &mut R) -> Self {
		let mut layers = Vec::with_capacity(blocks);
		layers.push(ConvBlock::new(CHANNELS, channels, 1, rng));
		for _ in 1..blocks {
			layers.push(ConvBlock::new(channels, channels, 1, rng));
		}
		Self {
			blocks: layers,
			pool: GlobalAvgPool::new(),
			linear: Linear::new(channels, 1, rng),
		}
	}

	/// `[N, 3, H, W] -> [N, 1]` logits.
	pub fn forward(&mut self, image: &Array4<f32>) -> Result<Array2<f32>> {
		let mut features = image.clone();
		for block in &mut self.blocks {
			features = block.forward(&features)?;
		}
		let pooled = self.pool.forward(&features);
		self.linear.forward(&pooled)
	}

	/// With [`GradMode::InputOnly`] the discriminator acts as a frozen critic for the encoder.
	pub fn backward(&mut self, grad: &Array2<f32>, mode: GradMode) -> Result<Array4<f32>> {
		let grad = self.linear.backward(grad, mode)?;
		let mut grad = self.pool.backward(&grad)?;
		for block in self.blocks.iter_mut().rev() {
			grad = block.backward(&grad, mode)?;
		}
		Ok(grad)
	}
}

impl Module for Discriminator {
	fn params(&self) -> Vec<&Param> {
		let mut params: Vec<&Param> = self.blocks.iter().flat_map(|b| b.params()).collect();
		params.extend(self.linear.params());
		params
	}

	fn params_mut(&mut self) -> Vec<&mut Param> {
		let mut params: Vec<&mut Param> = self.blocks.iter_mut().flat_map(|b| b.params_mut()).collect();
		params.extend(self.linear.params_mut());
		params
	}
}
