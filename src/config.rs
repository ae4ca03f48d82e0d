use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{io, network, training};
use crate::error::{Result, WatermarkError};
use crate::noise::NoisePipeline;
use crate::training::metrics::METRIC_NAMES;

/// Encoder architecture. Decoder and discriminator are shared by all variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Architecture {
	Hidden,
	UnetConv,
}

impl Architecture {
	pub fn name(&self) -> &'static str {
		match self {
			Architecture::Hidden => "hidden",
			Architecture::UnetConv => "unet-conv",
		}
	}
}

impl FromStr for Architecture {
	type Err = WatermarkError;

	fn from_str(s: &str) -> Result<Self> {
		match s.to_lowercase().as_str() {
			"hidden" => Ok(Architecture::Hidden),
			"unet-conv" => Ok(Architecture::UnetConv),
			"unet-down" | "unet-attn" => Err(WatermarkError::Configuration(format!(
				"architecture '{}' is not supported",
				s
			))),
			_ => Err(WatermarkError::Configuration(format!(
				"network type must be one of [hidden, unet-conv], instead it is '{}'",
				s
			))),
		}
	}
}

impl fmt::Display for Architecture {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.name())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
	Cpu,
}

impl FromStr for Device {
	type Err = WatermarkError;

	fn from_str(s: &str) -> Result<Self> {
		match s.to_lowercase().as_str() {
			"cpu" => Ok(Device::Cpu),
			other => Err(WatermarkError::Configuration(format!(
				"device '{}' is not available, only 'cpu' is supported",
				other
			))),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossWeights {
	pub encoder: f32,
	pub decoder: f32,
	pub adversarial: f32,
}

impl Default for LossWeights {
	fn default() -> Self {
		Self {
			encoder: training::DEFAULT_ENCODER_LOSS_WEIGHT,
			decoder: training::DEFAULT_DECODER_LOSS_WEIGHT,
			adversarial: training::DEFAULT_ADVERSARIAL_LOSS_WEIGHT,
		}
	}
}

impl LossWeights {
	fn validate(&self) -> Result<()> {
		for (name, weight) in [
			("encoder", self.encoder),
			("decoder", self.decoder),
			("adversarial", self.adversarial),
		] {
			if !weight.is_finite() || weight < 0.0 {
				return Err(WatermarkError::Configuration(format!(
					"{} loss weight ({}) must be a finite, non-negative number",
					name, weight
				)));
			}
		}
		Ok(())
	}
}

/// Depth and width of a plain convolutional network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkShape {
	pub blocks: usize,
	pub channels: usize,
}

impl NetworkShape {
	pub fn new(blocks: usize, channels: usize) -> Self {
		Self { blocks, channels }
	}

	fn validate(&self, name: &str) -> Result<()> {
		if self.blocks == 0 {
			return Err(WatermarkError::Configuration(format!(
				"{} blocks must be greater than 0",
				name
			)));
		}
		if self.channels == 0 {
			return Err(WatermarkError::Configuration(format!(
				"{} channels must be greater than 0",
				name
			)));
		}
		Ok(())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnetShape {
	/// Filters of the outermost level; inner levels use multiples of it.
	pub filters: usize,
	pub down_blocks: usize,
}

impl Default for UnetShape {
	fn default() -> Self {
		Self {
			filters: network::DEFAULT_UNET_FILTERS,
			down_blocks: network::DEFAULT_UNET_DOWN_BLOCKS,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkConfig {
	pub architecture: Architecture,
	pub message_length: usize,
	pub image_size: usize,
	pub batch_size: usize,
	pub epochs: usize,
	pub learning_rate: f32,
	pub loss_weights: LossWeights,
	pub encoder: NetworkShape,
	pub decoder: NetworkShape,
	pub discriminator: NetworkShape,
	pub unet: UnetShape,
	pub noise: String,
	pub device: Device,
	pub seed: Option<u64>,
	pub train_folder: Option<PathBuf>,
	pub validation_folder: Option<PathBuf>,
	pub batches_per_epoch: Option<usize>,
	pub jobs_folder: PathBuf,
	pub job_name: String,
	pub job_folder: PathBuf,
	pub checkpoint_folder: PathBuf,
	pub model_folder: Option<PathBuf>,
	pub best_metric: Option<String>,
	pub show_progress: bool,
}

impl Default for WatermarkConfig {
	fn default() -> Self {
		let jobs_folder = PathBuf::from(io::DEFAULT_JOBS_FOLDER);
		Self {
			architecture: Architecture::Hidden,
			message_length: network::DEFAULT_MESSAGE_LENGTH,
			image_size: network::DEFAULT_IMAGE_SIZE,
			batch_size: training::DEFAULT_BATCH_SIZE,
			epochs: training::DEFAULT_EPOCHS,
			learning_rate: training::DEFAULT_LEARNING_RATE,
			loss_weights: LossWeights::default(),
			encoder: NetworkShape::new(network::DEFAULT_ENCODER_BLOCKS, network::DEFAULT_CHANNELS),
			decoder: NetworkShape::new(network::DEFAULT_DECODER_BLOCKS, network::DEFAULT_CHANNELS),
			discriminator: NetworkShape::new(network::DEFAULT_DISCRIMINATOR_BLOCKS, network::DEFAULT_CHANNELS),
			unet: UnetShape::default(),
			noise: String::new(),
			device: Device::Cpu,
			seed: None,
			train_folder: None,
			validation_folder: None,
			batches_per_epoch: None,
			job_name: String::new(),
			job_folder: jobs_folder.clone(),
			checkpoint_folder: jobs_folder.join(io::CHECKPOINT_DIR),
			jobs_folder,
			model_folder: None,
			best_metric: None,
			show_progress: true,
		}
	}
}

impl WatermarkConfig {
	pub fn builder() -> WatermarkConfigBuilder {
		WatermarkConfigBuilder::default()
	}

	/// Checks every run-level constant, including that the noise specification parses.
	pub fn validate(&self) -> Result<()> {
		if self.message_length == 0 {
			return Err(WatermarkError::Configuration(
				"Message length must be greater than 0".into(),
			));
		}
		if self.image_size == 0 {
			return Err(WatermarkError::Configuration("Image size must be greater than 0".into()));
		}
		if self.batch_size == 0 {
			return Err(WatermarkError::Configuration(format!(
				"Batch size ({}) must be greater than 0",
				self.batch_size
			)));
		}
		if self.epochs == 0 {
			return Err(WatermarkError::Configuration("Epochs must be greater than 0".into()));
		}
		if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
			return Err(WatermarkError::Configuration(format!(
				"Learning rate ({}) must be greater than 0",
				self.learning_rate
			)));
		}
		if self.batches_per_epoch == Some(0) {
			return Err(WatermarkError::Configuration(
				"Batches per epoch must be greater than 0".into(),
			));
		}
		self.loss_weights.validate()?;
		self.encoder.validate("encoder")?;
		self.decoder.validate("decoder")?;
		self.discriminator.validate("discriminator")?;
		if self.architecture == Architecture::UnetConv {
			if self.unet.filters == 0 {
				return Err(WatermarkError::Configuration("U-Net filters must be greater than 0".into()));
			}
			if self.unet.down_blocks < network::MIN_UNET_DOWN_BLOCKS {
				return Err(WatermarkError::Configuration(format!(
					"U-Net down blocks ({}) must be at least {}",
					self.unet.down_blocks,
					network::MIN_UNET_DOWN_BLOCKS
				)));
			}
		}
		if let Some(metric) = &self.best_metric {
			if !METRIC_NAMES.contains(&metric.as_str()) {
				return Err(WatermarkError::Configuration(format!(
					"best metric '{}' must be one of [{}]",
					metric,
					METRIC_NAMES.join(", ")
				)));
			}
		}
		NoisePipeline::parse(&self.noise)?;
		Ok(())
	}
}

#[derive(Default)]
pub struct WatermarkConfigBuilder {
	architecture: Option<Architecture>,
	message_length: Option<usize>,
	image_size: Option<usize>,
	batch_size: Option<usize>,
	epochs: Option<usize>,
	learning_rate: Option<f32>,
	loss_weights: Option<LossWeights>,
	encoder: Option<NetworkShape>,
	decoder: Option<NetworkShape>,
	discriminator: Option<NetworkShape>,
	unet: Option<UnetShape>,
	noise: Option<String>,
	seed: Option<u64>,
	train_folder: Option<PathBuf>,
	validation_folder: Option<PathBuf>,
	batches_per_epoch: Option<usize>,
	device: Option<Device>,
	jobs_folder: Option<PathBuf>,
	job_name: Option<String>,
	job_folder: Option<PathBuf>,
	checkpoint_folder: Option<PathBuf>,
	model_folder: Option<PathBuf>,
	best_metric: Option<String>,
	show_progress: Option<bool>,
}

impl WatermarkConfigBuilder {
	pub fn architecture(mut self, architecture: Architecture) -> Self {
		self.architecture = Some(architecture);
		self
	}

	pub fn message_length(mut self, length: usize) -> Self {
		self.message_length = Some(length);
		self
	}

	pub fn image_size(mut self, size: usize) -> Self {
		self.image_size = Some(size);
		self
	}

	pub fn batch_size(mut self, size: usize) -> Self {
		self.batch_size = Some(size);
		self
	}

	pub fn epochs(mut self, epochs: usize) -> Self {
		self.epochs = Some(epochs);
		self
	}

	pub fn learning_rate(mut self, rate: f32) -> Self {
		self.learning_rate = Some(rate);
		self
	}

	pub fn loss_weights(mut self, weights: LossWeights) -> Self {
		self.loss_weights = Some(weights);
		self
	}

	pub fn encoder(mut self, shape: NetworkShape) -> Self {
		self.encoder = Some(shape);
		self
	}

	pub fn decoder(mut self, shape: NetworkShape) -> Self {
		self.decoder = Some(shape);
		self
	}

	pub fn discriminator(mut self, shape: NetworkShape) -> Self {
		self.discriminator = Some(shape);
		self
	}

	pub fn unet(mut self, shape: UnetShape) -> Self {
		self.unet = Some(shape);
		self
	}

	pub fn noise(mut self, spec: impl Into<String>) -> Self {
		self.noise = Some(spec.into());
		self
	}

	pub fn seed(mut self, seed: u64) -> Self {
		self.seed = Some(seed);
		self
	}

	pub fn train_folder(mut self, folder: impl Into<PathBuf>) -> Self {
		self.train_folder = Some(folder.into());
		self
	}

	pub fn validation_folder(mut self, folder: impl Into<PathBuf>) -> Self {
		self.validation_folder = Some(folder.into());
		self
	}

	pub fn batches_per_epoch(mut self, batches: usize) -> Self {
		self.batches_per_epoch = Some(batches);
		self
	}

	pub fn device(mut self, device: Device) -> Self {
		self.device = Some(device);
		self
	}

	pub fn jobs_folder(mut self, folder: impl Into<PathBuf>) -> Self {
		self.jobs_folder = Some(folder.into());
		self
	}

	/// Unless a job folder is set explicitly it becomes `<jobs_folder>/<job_name>`.
	pub fn job_name(mut self, name: impl Into<String>) -> Self {
		self.job_name = Some(name.into());
		self
	}

	/// Sets the job folder; the checkpoint folder defaults to `<job_folder>/checkpoints`.
	pub fn job_folder(mut self, folder: impl Into<PathBuf>) -> Self {
		self.job_folder = Some(folder.into());
		self
	}

	pub fn checkpoint_folder(mut self, folder: impl Into<PathBuf>) -> Self {
		self.checkpoint_folder = Some(folder.into());
		self
	}

	/// Folder the final `last` checkpoint is copied into after training.
	pub fn model_folder(mut self, folder: impl Into<PathBuf>) -> Self {
		self.model_folder = Some(folder.into());
		self
	}

	pub fn best_metric(mut self, metric: impl Into<String>) -> Self {
		self.best_metric = Some(metric.into());
		self
	}

	pub fn show_progress(mut self, show: bool) -> Self {
		self.show_progress = Some(show);
		self
	}

	pub fn build(self) -> WatermarkConfig {
		let defaults = WatermarkConfig::default();
		let jobs_folder = self.jobs_folder.unwrap_or(defaults.jobs_folder);
		let job_name = self.job_name.unwrap_or(defaults.job_name);
		let job_folder = self.job_folder.unwrap_or_else(|| {
			if job_name.is_empty() {
				jobs_folder.clone()
			} else {
				jobs_folder.join(&job_name)
			}
		});
		let checkpoint_folder = self
			.checkpoint_folder
			.unwrap_or_else(|| job_folder.join(io::CHECKPOINT_DIR));
		WatermarkConfig {
			architecture: self.architecture.unwrap_or(defaults.architecture),
			message_length: self.message_length.unwrap_or(defaults.message_length),
			image_size: self.image_size.unwrap_or(defaults.image_size),
			batch_size: self.batch_size.unwrap_or(defaults.batch_size),
			epochs: self.epochs.unwrap_or(defaults.epochs),
			learning_rate: self.learning_rate.unwrap_or(defaults.learning_rate),
			loss_weights: self.loss_weights.unwrap_or(defaults.loss_weights),
			encoder: self.encoder.unwrap_or(defaults.encoder),
			decoder: self.decoder.unwrap_or(defaults.decoder),
			discriminator: self.discriminator.unwrap_or(defaults.discriminator),
			unet: self.unet.unwrap_or(defaults.unet),
			noise: self.noise.unwrap_or(defaults.noise),
			device: self.device.unwrap_or(defaults.device),
			seed: self.seed.or(defaults.seed),
			train_folder: self.train_folder.or(defaults.train_folder),
			validation_folder: self.validation_folder.or(defaults.validation_folder),
			batches_per_epoch: self.batches_per_epoch.or(defaults.batches_per_epoch),
			jobs_folder,
			job_name,
			job_folder,
			checkpoint_folder,
			model_folder: self.model_folder.or(defaults.model_folder),
			best_metric: self.best_metric.or(defaults.best_metric),
			show_progress: self.show_progress.unwrap_or(defaults.show_progress),
		}
	}
}
