//! Encoder, decoder and discriminator networks plus the [`WatermarkModel`] that owns them.

pub mod decoder;
pub mod discriminator;
pub mod encoder;
pub mod unet;

pub use self::decoder::Decoder;
pub use self::discriminator::Discriminator;
pub use self::encoder::HiddenEncoder;
pub use self::unet::{BlockPosition, UnetBlock, UnetEncoder};

use std::fmt;

use ndarray::{Array2, Array4};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{Architecture, NetworkShape, UnetShape, WatermarkConfig};
use crate::constants::network::CHANNELS;
use crate::error::{Result, WatermarkError};
use crate::nn::{Adam, GradMode, Module, Param};

#[derive(Debug, Clone)]
pub enum Encoder {
	Hidden(HiddenEncoder),
	Unet(UnetEncoder),
}

impl Encoder {
	pub fn forward(&mut self, image: &Array4<f32>, message: &Array2<f32>) -> Result<Array4<f32>> {
		match self {
			Encoder::Hidden(encoder) => encoder.forward(image, message),
			Encoder::Unet(encoder) => encoder.forward(image, message),
		}
	}

	pub fn backward(&mut self, grad: &Array4<f32>, mode: GradMode) -> Result<Array4<f32>> {
		match self {
			Encoder::Hidden(encoder) => encoder.backward(grad, mode),
			Encoder::Unet(encoder) => encoder.backward(grad, mode),
		}
	}
}

impl Module for Encoder {
	fn params(&self) -> Vec<&Param> {
		match self {
			Encoder::Hidden(encoder) => encoder.params(),
			Encoder::Unet(encoder) => encoder.params(),
		}
	}

	fn params_mut(&mut self) -> Vec<&mut Param> {
		match self {
			Encoder::Hidden(encoder) => encoder.params_mut(),
			Encoder::Unet(encoder) => encoder.params_mut(),
		}
	}
}

/// The hyperparameters that determine every parameter shape. A checkpoint can only be restored
/// into a model with an equal signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureSignature {
	pub architecture: Architecture,
	pub message_length: usize,
	pub encoder: Option<NetworkShape>,
	pub unet: Option<UnetShape>,
	pub decoder: NetworkShape,
	pub discriminator: NetworkShape,
}

impl ArchitectureSignature {
	pub fn from_config(config: &WatermarkConfig) -> Self {
		let (encoder, unet) = match config.architecture {
			Architecture::Hidden => (Some(config.encoder), None),
			Architecture::UnetConv => (None, Some(config.unet)),
		};
		Self {
			architecture: config.architecture,
			message_length: config.message_length,
			encoder,
			unet,
			decoder: config.decoder,
			discriminator: config.discriminator,
		}
	}
}

impl fmt::Display for ArchitectureSignature {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{} L={}", self.architecture, self.message_length)?;
		if let Some(encoder) = self.encoder {
			write!(f, " encoder={}x{}", encoder.blocks, encoder.channels)?;
		}
		if let Some(unet) = self.unet {
			write!(f, " unet={}x{}", unet.down_blocks, unet.filters)?;
		}
		write!(
			f,
			" decoder={}x{} discriminator={}x{}",
			self.decoder.blocks, self.decoder.channels, self.discriminator.blocks, self.discriminator.channels
		)
	}
}

/// Encoder, decoder and discriminator with their optimizers.
///
/// The encoder and decoder are trained jointly by one Adam instance, the discriminator by another, so
/// either side can be stepped while the other stays frozen.
#[derive(Debug, Clone)]
pub struct WatermarkModel {
	pub encoder: Encoder,
	pub decoder: Decoder,
	pub discriminator: Discriminator,
	enc_dec_optimizer: Adam,
	discriminator_optimizer: Adam,
	signature: ArchitectureSignature,
}

impl WatermarkModel {
	pub fn new<R: Rng + ?Sized>(config: &WatermarkConfig, rng: &mut R) -> Result<Self> {
		if config.message_length == 0 {
			return Err(WatermarkError::ShapeMismatch("message length must be greater than 0".into()));
		}
		if config.image_size == 0 {
			return Err(WatermarkError::ShapeMismatch("image size must be greater than 0".into()));
		}
		let length = config.message_length;
		let encoder = match config.architecture {
			Architecture::Hidden => Encoder::Hidden(HiddenEncoder::new(
				length,
				config.encoder.blocks,
				config.encoder.channels,
				rng,
			)),
			Architecture::UnetConv => Encoder::Unet(UnetEncoder::new(
				length,
				config.unet.filters,
				config.unet.down_blocks,
				config.image_size,
				rng,
			)?),
		};
		let decoder = Decoder::new(length, config.decoder.blocks, config.decoder.channels, rng);
		let discriminator = Discriminator::new(config.discriminator.blocks, config.discriminator.channels, rng);

		let enc_dec_optimizer = {
			let mut params = encoder.params();
			params.extend(decoder.params());
			Adam::new(config.learning_rate, &params)
		};
		let discriminator_optimizer = Adam::new(config.learning_rate, &discriminator.params());

		Ok(Self {
			encoder,
			decoder,
			discriminator,
			enc_dec_optimizer,
			discriminator_optimizer,
			signature: ArchitectureSignature::from_config(config),
		})
	}

	pub fn signature(&self) -> &ArchitectureSignature {
		&self.signature
	}

	pub fn message_length(&self) -> usize {
		self.signature.message_length
	}

	/// Checks a cover batch and its messages against the model before any forward pass.
	pub fn check_inputs(&self, cover: &Array4<f32>, message: &Array2<f32>) -> Result<()> {
		let (batch, channels, _, _) = cover.dim();
		if channels != CHANNELS {
			return Err(WatermarkError::ShapeMismatch(format!(
				"cover images must have {} channels, got {}",
				CHANNELS, channels
			)));
		}
		if message.dim() != (batch, self.message_length()) {
			return Err(WatermarkError::ShapeMismatch(format!(
				"messages have shape {:?}, expected {:?}",
				message.dim(),
				(batch, self.message_length())
			)));
		}
		Ok(())
	}

	pub fn enc_dec_optimizer(&self) -> &Adam {
		&self.enc_dec_optimizer
	}

	pub fn discriminator_optimizer(&self) -> &Adam {
		&self.discriminator_optimizer
	}

	pub fn enc_dec_optimizer_mut(&mut self) -> &mut Adam {
		&mut self.enc_dec_optimizer
	}

	pub fn discriminator_optimizer_mut(&mut self) -> &mut Adam {
		&mut self.discriminator_optimizer
	}

	pub fn zero_enc_dec_grad(&mut self) {
		self.encoder.zero_grad();
		self.decoder.zero_grad();
	}

	pub fn zero_discriminator_grad(&mut self) {
		self.discriminator.zero_grad();
	}

	/// Applies the accumulated encoder and decoder gradients; non-finite gradients abort the step.
	pub fn step_enc_dec(&mut self) -> Result<()> {
		let mut params = self.encoder.params_mut();
		params.extend(self.decoder.params_mut());
		check_gradients("encoder_decoder_gradient", &params)?;
		self.enc_dec_optimizer.step(&mut params)
	}

	pub fn step_discriminator(&mut self) -> Result<()> {
		let mut params = self.discriminator.params_mut();
		check_gradients("discriminator_gradient", &params)?;
		self.discriminator_optimizer.step(&mut params)
	}

	pub fn num_parameters(&self) -> usize {
		self.encoder.num_parameters() + self.decoder.num_parameters() + self.discriminator.num_parameters()
	}
}

fn check_gradients(metric: &str, params: &[&mut Param]) -> Result<()> {
	for param in params {
		if let Some(&value) = param.grad.iter().find(|g| !g.is_finite()) {
			return Err(WatermarkError::NumericDivergence {
				metric: metric.to_string(),
				value,
			});
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::message::random_messages;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	fn small_config(architecture: Architecture) -> WatermarkConfig {
		WatermarkConfig::builder()
			.architecture(architecture)
			.message_length(6)
			.image_size(32)
			.encoder(NetworkShape::new(1, 4))
			.decoder(NetworkShape::new(1, 4))
			.discriminator(NetworkShape::new(1, 4))
			.unet(UnetShape {
				filters: 1,
				down_blocks: 5,
			})
			.build()
	}

	#[test]
	fn hidden_model_keeps_image_shape_and_decodes_message_width() {
		let mut rng = StdRng::seed_from_u64(31);
		let mut model = WatermarkModel::new(&small_config(Architecture::Hidden), &mut rng).unwrap();
		let cover = Array4::from_shape_fn((2, 3, 32, 32), |_| rng.gen_range(-1.0..1.0));
		let message = random_messages(2, 6, &mut rng);
		model.check_inputs(&cover, &message).unwrap();
		let watermarked = model.encoder.forward(&cover, &message).unwrap();
		assert_eq!(watermarked.dim(), cover.dim());
		let decoded = model.decoder.forward(&watermarked).unwrap();
		assert_eq!(decoded.dim(), (2, 6));
		let logits = model.discriminator.forward(&watermarked).unwrap();
		assert_eq!(logits.dim(), (2, 1));
	}

	#[test]
	fn signature_tracks_message_length_and_architecture() {
		let hidden = ArchitectureSignature::from_config(&small_config(Architecture::Hidden));
		let unet = ArchitectureSignature::from_config(&small_config(Architecture::UnetConv));
		assert_ne!(hidden, unet);
		let mut longer = small_config(Architecture::Hidden);
		longer.message_length = 7;
		assert_ne!(hidden, ArchitectureSignature::from_config(&longer));
	}

	#[test]
	fn check_inputs_rejects_wrong_message_length() {
		let mut rng = StdRng::seed_from_u64(32);
		let model = WatermarkModel::new(&small_config(Architecture::Hidden), &mut rng).unwrap();
		let cover = Array4::zeros((2, 3, 32, 32));
		let message = Array2::zeros((2, 5));
		assert!(matches!(
			model.check_inputs(&cover, &message),
			Err(WatermarkError::ShapeMismatch(_))
		));
	}

	#[test]
	fn non_finite_gradients_block_the_optimizer_step() {
		let mut rng = StdRng::seed_from_u64(33);
		let mut model = WatermarkModel::new(&small_config(Architecture::Hidden), &mut rng).unwrap();
		let before = model.discriminator.parameter_values();
		model.discriminator.params_mut()[0].grad.fill(f32::NAN);
		assert!(matches!(
			model.step_discriminator(),
			Err(WatermarkError::NumericDivergence { .. })
		));
		assert_eq!(model.discriminator.parameter_values(), before);
		assert_eq!(model.discriminator_optimizer().state().step, 0);
	}
}
