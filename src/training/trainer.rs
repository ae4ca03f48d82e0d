use std::path::PathBuf;

use indexmap::IndexMap;
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array2, Array4};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info, warn};

use super::checkpoint::{Checkpoint, CheckpointHandle, CheckpointManager};
use super::data_loader::{save_comparison, CoverSource};
use super::metrics::{self, EpochMetrics, MetricsAccumulator, MetricsSink, Phase};
use crate::config::{LossWeights, WatermarkConfig};
use crate::constants::{io, training::FAKE_LABEL, training::REAL_LABEL};
use crate::error::{Result, WatermarkError};
use crate::message::{bit_error_rate, random_messages};
use crate::network::WatermarkModel;
use crate::noise::NoisePipeline;
use crate::nn::{bce_with_logits, mse, GradMode};
use crate::psnr::batch_psnr;

/// Per-batch metric values, keyed by the names in [`metrics::METRIC_NAMES`].
pub type BatchMetrics = IndexMap<String, f64>;

/// Result of one generator update.
#[derive(Debug, Clone)]
pub struct GeneratorOutput {
	pub watermarked: Array4<f32>,
	pub noised: Array4<f32>,
	pub decoded: Array2<f32>,
	pub metrics: BatchMetrics,
}

/// What a run of [`Trainer::fit`] should do.
#[derive(Debug, Clone)]
pub struct FitPlan {
	/// First epoch to train, 1-based.
	pub start_epoch: usize,
	/// Last epoch to train, inclusive.
	pub epochs: usize,
	/// Caps the batches drawn per epoch; the source decides when unset.
	pub batches_per_epoch: Option<usize>,
	/// Metric whose lowest value selects the `best` checkpoint.
	pub best_metric: Option<String>,
	pub show_progress: bool,
	pub images_folder: Option<PathBuf>,
}

impl FitPlan {
	pub fn from_config(config: &WatermarkConfig, start_epoch: usize) -> Self {
		Self {
			start_epoch,
			epochs: config.epochs,
			batches_per_epoch: config.batches_per_epoch,
			best_metric: config.best_metric.clone(),
			show_progress: config.show_progress,
			images_folder: Some(config.job_folder.join(io::IMAGES_DIR)),
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct FitSummary {
	pub completed_epochs: Vec<usize>,
	/// Epochs whose checkpoint could not be written.
	pub failed_checkpoints: Vec<usize>,
	pub last_checkpoint: Option<CheckpointHandle>,
	pub best: Option<(usize, f64)>,
}

/// Alternates discriminator and generator updates over a [`WatermarkModel`].
pub struct Trainer {
	model: WatermarkModel,
	noise: NoisePipeline,
	weights: LossWeights,
	rng: StdRng,
}

impl Trainer {
	pub fn new(model: WatermarkModel, noise: NoisePipeline, weights: LossWeights, rng: StdRng) -> Self {
		Self {
			model,
			noise,
			weights,
			rng,
		}
	}

	/// Validates `config` and builds a freshly initialised model and its noise pipeline.
	pub fn from_config(config: &WatermarkConfig) -> Result<Self> {
		config.validate()?;
		let mut rng = match config.seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::from_entropy(),
		};
		let model = WatermarkModel::new(config, &mut rng)?;
		let noise = NoisePipeline::parse(&config.noise)?;
		info!(
			signature = %model.signature(),
			parameters = model.num_parameters(),
			noise = %noise,
			"Built watermark model"
		);
		Ok(Self::new(model, noise, config.loss_weights, rng))
	}

	pub fn model(&self) -> &WatermarkModel {
		&self.model
	}

	pub fn model_mut(&mut self) -> &mut WatermarkModel {
		&mut self.model
	}

	pub fn noise(&self) -> &NoisePipeline {
		&self.noise
	}

	pub fn into_model(self) -> WatermarkModel {
		self.model
	}

	pub fn sample_messages(&mut self, batch: usize) -> Array2<f32> {
		random_messages(batch, self.model.message_length(), &mut self.rng)
	}

	pub fn encode(&mut self, cover: &Array4<f32>, message: &Array2<f32>) -> Result<Array4<f32>> {
		self.model.check_inputs(cover, message)?;
		self.model.encoder.forward(cover, message)
	}

	/// One discriminator update followed by one generator update on the same batch.
	pub fn train_on_batch(&mut self, cover: &Array4<f32>, message: &Array2<f32>) -> Result<BatchMetrics> {
		self.model.check_inputs(cover, message)?;
		let watermarked = self.model.encoder.forward(cover, message)?;
		let (cover_bce, encoded_bce) = self.update_discriminator(cover, &watermarked)?;
		let mut output = self.update_generator(cover, message, watermarked)?;
		output
			.metrics
			.insert(metrics::DISCRIMINATOR_COVER_BCE.to_string(), f64::from(cover_bce));
		output
			.metrics
			.insert(metrics::DISCRIMINATOR_ENCODED_BCE.to_string(), f64::from(encoded_bce));
		Ok(output.metrics)
	}

	/// Updates only the discriminator: covers are labelled real, their watermarked versions fake.
	/// Returns the two cross-entropies.
	pub fn discriminator_step(&mut self, cover: &Array4<f32>, message: &Array2<f32>) -> Result<(f32, f32)> {
		let watermarked = self.encode(cover, message)?;
		self.update_discriminator(cover, &watermarked)
	}

	/// Updates only the encoder and decoder, back-propagating through the noise pipeline. The
	/// discriminator contributes the adversarial gradient but keeps its parameters.
	pub fn generator_step(&mut self, cover: &Array4<f32>, message: &Array2<f32>) -> Result<GeneratorOutput> {
		let watermarked = self.encode(cover, message)?;
		self.update_generator(cover, message, watermarked)
	}

	/// Forward passes only; no parameter or optimizer state changes.
	pub fn validate_on_batch(&mut self, cover: &Array4<f32>, message: &Array2<f32>) -> Result<BatchMetrics> {
		let watermarked = self.encode(cover, message)?;
		let noised = self.noise.apply(&watermarked, cover, &mut self.rng)?;
		let decoded = self.model.decoder.forward(&noised)?;

		let (adversarial_bce, _) = bce_with_logits(&self.model.discriminator.forward(&watermarked)?, REAL_LABEL);
		let (cover_bce, _) = bce_with_logits(&self.model.discriminator.forward(cover)?, REAL_LABEL);
		let (encoded_bce, _) = bce_with_logits(&self.model.discriminator.forward(&watermarked)?, FAKE_LABEL);
		let (encoder_mse, _) = mse(&watermarked, cover)?;
		let (decoder_mse, _) = mse(&decoded, message)?;
		let loss = self.composite_loss(adversarial_bce, encoder_mse, decoder_mse);
		ensure_finite(metrics::LOSS, loss)?;

		let mut batch = self.batch_metrics(cover, &watermarked, &decoded, message, loss, encoder_mse, decoder_mse, adversarial_bce)?;
		batch.insert(metrics::DISCRIMINATOR_COVER_BCE.to_string(), f64::from(cover_bce));
		batch.insert(metrics::DISCRIMINATOR_ENCODED_BCE.to_string(), f64::from(encoded_bce));
		Ok(batch)
	}

	fn update_discriminator(&mut self, cover: &Array4<f32>, watermarked: &Array4<f32>) -> Result<(f32, f32)> {
		let model = &mut self.model;
		model.zero_discriminator_grad();

		let (cover_bce, grad) = bce_with_logits(&model.discriminator.forward(cover)?, REAL_LABEL);
		ensure_finite(metrics::DISCRIMINATOR_COVER_BCE, cover_bce)?;
		model.discriminator.backward(&grad, GradMode::Accumulate)?;

		let (encoded_bce, grad) = bce_with_logits(&model.discriminator.forward(watermarked)?, FAKE_LABEL);
		ensure_finite(metrics::DISCRIMINATOR_ENCODED_BCE, encoded_bce)?;
		model.discriminator.backward(&grad, GradMode::Accumulate)?;

		model.step_discriminator()?;
		Ok((cover_bce, encoded_bce))
	}

	/// Expects the encoder to still hold the forward pass that produced `watermarked`.
	fn update_generator(
		&mut self,
		cover: &Array4<f32>,
		message: &Array2<f32>,
		watermarked: Array4<f32>,
	) -> Result<GeneratorOutput> {
		let weights = self.weights;
		self.model.zero_enc_dec_grad();

		let (noised, trace) = self.noise.forward(&watermarked, cover, &mut self.rng)?;
		let decoded = self.model.decoder.forward(&noised)?;
		let logits = self.model.discriminator.forward(&watermarked)?;

		let (adversarial_bce, adversarial_grad) = bce_with_logits(&logits, REAL_LABEL);
		let (encoder_mse, encoder_grad) = mse(&watermarked, cover)?;
		let (decoder_mse, decoder_grad) = mse(&decoded, message)?;
		let loss = self.composite_loss(adversarial_bce, encoder_mse, decoder_mse);
		ensure_finite(metrics::LOSS, loss)?;

		let grad_noised = self
			.model
			.decoder
			.backward(&(decoder_grad * weights.decoder), GradMode::Accumulate)?;
		let mut grad_watermarked = self.noise.backward(&grad_noised, &trace)?;
		grad_watermarked.scaled_add(weights.encoder, &encoder_grad);
		grad_watermarked += &self
			.model
			.discriminator
			.backward(&(adversarial_grad * weights.adversarial), GradMode::InputOnly)?;
		self.model.encoder.backward(&grad_watermarked, GradMode::Accumulate)?;
		self.model.step_enc_dec()?;

		let metrics = self.batch_metrics(
			cover,
			&watermarked,
			&decoded,
			message,
			loss,
			encoder_mse,
			decoder_mse,
			adversarial_bce,
		)?;
		Ok(GeneratorOutput {
			watermarked,
			noised,
			decoded,
			metrics,
		})
	}

	fn composite_loss(&self, adversarial_bce: f32, encoder_mse: f32, decoder_mse: f32) -> f32 {
		self.weights.adversarial * adversarial_bce + self.weights.encoder * encoder_mse + self.weights.decoder * decoder_mse
	}

	#[allow(clippy::too_many_arguments)]
	fn batch_metrics(
		&self,
		cover: &Array4<f32>,
		watermarked: &Array4<f32>,
		decoded: &Array2<f32>,
		message: &Array2<f32>,
		loss: f32,
		encoder_mse: f32,
		decoder_mse: f32,
		adversarial_bce: f32,
	) -> Result<BatchMetrics> {
		let mut batch = BatchMetrics::new();
		batch.insert(metrics::LOSS.to_string(), f64::from(loss));
		batch.insert(metrics::ENCODER_MSE.to_string(), f64::from(encoder_mse));
		batch.insert(metrics::DECODER_MSE.to_string(), f64::from(decoder_mse));
		batch.insert(
			metrics::BITWISE_ERROR.to_string(),
			bit_error_rate(decoded.view(), message.view())?,
		);
		batch.insert(metrics::ADVERSARIAL_BCE.to_string(), f64::from(adversarial_bce));
		batch.insert(metrics::PSNR.to_string(), batch_psnr(cover, watermarked)?);
		Ok(batch)
	}

	/// Trains epochs `plan.start_epoch..=plan.epochs`.
	///
	/// Every completed epoch is checkpointed and then reported to `sink`, train before validation.
	/// A failed checkpoint write is logged and left for the next epoch boundary; a non-finite loss
	/// flushes the partial epoch through [`MetricsSink::flush_partial`] and ends the run without
	/// writing a checkpoint or reporting that epoch.
	pub fn fit(
		&mut self,
		plan: &FitPlan,
		train: &mut dyn CoverSource,
		mut validation: Option<&mut dyn CoverSource>,
		checkpoints: &CheckpointManager,
		sink: &mut dyn MetricsSink,
	) -> Result<FitSummary> {
		let mut summary = FitSummary::default();
		let mut accumulator = MetricsAccumulator::new();
		info!(
			first = plan.start_epoch,
			last = plan.epochs,
			noise = %self.noise,
			"Beginning training"
		);

		for epoch in plan.start_epoch..=plan.epochs {
			let batches = plan.batches_per_epoch.unwrap_or_else(|| train.batches_per_epoch()).max(1);
			let progress = progress_bar(batches, epoch, plan.show_progress);
			train.reset(&mut self.rng);
			accumulator.reset();

			let mut last_batch = None;
			for step in 0..batches {
				let cover = train.next_batch(&mut self.rng)?;
				let message = self.sample_messages(cover.shape()[0]);
				let batch = match self.train_on_batch(&cover, &message) {
					Ok(batch) => batch,
					Err(e) => {
						progress.abandon();
						return Err(self.abort(e, epoch, Phase::Train, &accumulator, sink));
					}
				};
				debug!(epoch, step, loss = batch[metrics::LOSS], "Trained batch");
				accumulator.update_all(&batch);
				progress.set_message(format!("loss {:.4}", batch[metrics::LOSS]));
				progress.inc(1);
				last_batch = Some((cover, message));
			}
			progress.finish_and_clear();

			let train_metrics = accumulator.finalize(epoch, Phase::Train);
			let validation_metrics = match validation.as_deref_mut() {
				Some(source) => Some(self.run_validation(epoch, source, &mut accumulator, sink)?),
				None => None,
			};

			if let (Some(folder), Some((cover, message))) = (&plan.images_folder, &last_batch) {
				self.save_samples(epoch, cover, message, folder);
			}

			let checkpoint = Checkpoint::capture(epoch, &self.model);
			match checkpoints.save_checkpoint(&checkpoint) {
				Ok(handle) => summary.last_checkpoint = Some(handle),
				Err(e) if e.is_recoverable() => {
					warn!(epoch, error = %e, "Could not save checkpoint, retrying at the next epoch");
					summary.failed_checkpoints.push(epoch);
				}
				Err(e) => return Err(e),
			}

			report(sink, &train_metrics);
			if let Some(validation_metrics) = &validation_metrics {
				report(sink, validation_metrics);
			}

			if let Some(name) = &plan.best_metric {
				let value = validation_metrics
					.as_ref()
					.and_then(|m| m.get(name))
					.or_else(|| train_metrics.get(name));
				match value {
					Some(value) if summary.best.map_or(true, |(_, best)| value < best) => {
						match checkpoints.save_best(&checkpoint) {
							Ok(_) => {
								info!(epoch, metric = %name, value, "New best checkpoint");
								summary.best = Some((epoch, value));
							}
							Err(e) if e.is_recoverable() => {
								warn!(epoch, error = %e, "Could not save best checkpoint")
							}
							Err(e) => return Err(e),
						}
					}
					Some(_) => {}
					None => warn!(metric = %name, "Best-checkpoint metric was not reported"),
				}
			}

			summary.completed_epochs.push(epoch);
		}

		info!(epochs = summary.completed_epochs.len(), "Training finished");
		Ok(summary)
	}

	fn run_validation(
		&mut self,
		epoch: usize,
		source: &mut dyn CoverSource,
		accumulator: &mut MetricsAccumulator,
		sink: &mut dyn MetricsSink,
	) -> Result<EpochMetrics> {
		source.reset(&mut self.rng);
		accumulator.reset();
		for _ in 0..source.batches_per_epoch() {
			let cover = source.next_batch(&mut self.rng)?;
			let message = self.sample_messages(cover.shape()[0]);
			match self.validate_on_batch(&cover, &message) {
				Ok(batch) => accumulator.update_all(&batch),
				Err(e) => return Err(self.abort(e, epoch, Phase::Validation, accumulator, sink)),
			}
		}
		Ok(accumulator.finalize(epoch, Phase::Validation))
	}

	fn abort(
		&self,
		e: WatermarkError,
		epoch: usize,
		phase: Phase,
		accumulator: &MetricsAccumulator,
		sink: &mut dyn MetricsSink,
	) -> WatermarkError {
		if let WatermarkError::NumericDivergence { metric, value } = &e {
			error!(epoch, %phase, metric = %metric, value, "Training diverged");
			if let Err(flush_error) = sink.flush_partial(&accumulator.finalize(epoch, phase)) {
				warn!(error = %flush_error, "Could not flush partial metrics");
			}
		}
		e
	}

	fn save_samples(&mut self, epoch: usize, cover: &Array4<f32>, message: &Array2<f32>, folder: &std::path::Path) {
		let path = folder.join(format!("epoch-{:04}.png", epoch));
		let result = self
			.encode(cover, message)
			.and_then(|watermarked| save_comparison(cover, &watermarked, 8, &path));
		if let Err(e) = result {
			warn!(epoch, path = %path.display(), error = %e, "Could not save sample images");
		}
	}
}

fn ensure_finite(metric: &str, value: f32) -> Result<()> {
	if value.is_finite() {
		Ok(())
	} else {
		Err(WatermarkError::NumericDivergence {
			metric: metric.to_string(),
			value,
		})
	}
}

/// Sink failures never stop training.
fn report(sink: &mut dyn MetricsSink, epoch_metrics: &EpochMetrics) {
	if let Err(e) = sink.record(epoch_metrics) {
		warn!(epoch = epoch_metrics.epoch, error = %e, "Could not record metrics");
	}
}

fn progress_bar(len: usize, epoch: usize, visible: bool) -> ProgressBar {
	if !visible {
		return ProgressBar::hidden();
	}
	let bar = ProgressBar::new(len as u64);
	bar.set_style(
		ProgressStyle::default_bar()
			.template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
			.unwrap_or_else(|_| ProgressStyle::default_bar())
			.progress_chars("##-"),
	);
	bar.set_prefix(format!("epoch {}", epoch));
	bar
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::NetworkShape;
	use crate::nn::Module;

	fn tiny_trainer(noise: &str) -> Trainer {
		let config = WatermarkConfig::builder()
			.message_length(4)
			.image_size(8)
			.batch_size(2)
			.encoder(NetworkShape::new(1, 4))
			.decoder(NetworkShape::new(1, 4))
			.discriminator(NetworkShape::new(1, 4))
			.noise(noise)
			.seed(7)
			.build();
		Trainer::from_config(&config).unwrap()
	}

	fn cover() -> Array4<f32> {
		Array4::from_shape_fn((2, 3, 8, 8), |(n, c, y, x)| ((n + c + y * x) % 5) as f32 * 0.3 - 0.6)
	}

	#[test]
	fn discriminator_step_leaves_generator_untouched() {
		let mut trainer = tiny_trainer("");
		let message = trainer.sample_messages(2);
		let encoder_before = trainer.model().encoder.parameter_values();
		let discriminator_before = trainer.model().discriminator.parameter_values();
		trainer.discriminator_step(&cover(), &message).unwrap();
		assert_eq!(trainer.model().encoder.parameter_values(), encoder_before);
		assert_ne!(trainer.model().discriminator.parameter_values(), discriminator_before);
	}

	#[test]
	fn generator_step_leaves_discriminator_untouched() {
		let mut trainer = tiny_trainer("dropout(0.3,0.7)");
		let message = trainer.sample_messages(2);
		let encoder_before = trainer.model().encoder.parameter_values();
		let discriminator_before = trainer.model().discriminator.parameter_values();
		let output = trainer.generator_step(&cover(), &message).unwrap();
		assert_eq!(output.decoded.dim(), (2, 4));
		assert_eq!(trainer.model().discriminator.parameter_values(), discriminator_before);
		assert_ne!(trainer.model().encoder.parameter_values(), encoder_before);
	}

	#[test]
	fn validation_does_not_update_parameters() {
		let mut trainer = tiny_trainer("jpeg()");
		let message = trainer.sample_messages(2);
		let before = trainer.model().clone();
		let batch = trainer.validate_on_batch(&cover(), &message).unwrap();
		for name in metrics::METRIC_NAMES {
			assert!(batch.contains_key(*name), "missing {}", name);
		}
		assert_eq!(trainer.model().encoder.parameter_values(), before.encoder.parameter_values());
		assert_eq!(trainer.model().enc_dec_optimizer().state(), before.enc_dec_optimizer().state());
	}

	#[test]
	fn non_finite_cover_diverges() {
		let mut trainer = tiny_trainer("");
		let message = trainer.sample_messages(2);
		let cover = Array4::from_elem((2, 3, 8, 8), f32::NAN);
		let result = trainer.train_on_batch(&cover, &message);
		assert!(matches!(result, Err(WatermarkError::NumericDivergence { .. })));
	}
}
