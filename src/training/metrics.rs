use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use metrics::gauge;
use tracing::{info, warn};

use crate::constants::io;
use crate::error::{Result, WatermarkError};

pub const LOSS: &str = "loss";
pub const ENCODER_MSE: &str = "encoder_mse";
pub const DECODER_MSE: &str = "decoder_mse";
pub const BITWISE_ERROR: &str = "bitwise-error";
pub const ADVERSARIAL_BCE: &str = "adversarial_bce";
pub const DISCRIMINATOR_COVER_BCE: &str = "discr_cover_bce";
pub const DISCRIMINATOR_ENCODED_BCE: &str = "discr_encod_bce";
pub const PSNR: &str = "psnr";

/// Metric names in reporting order.
pub const METRIC_NAMES: &[&str] = &[
	LOSS,
	ENCODER_MSE,
	DECODER_MSE,
	BITWISE_ERROR,
	ADVERSARIAL_BCE,
	DISCRIMINATOR_COVER_BCE,
	DISCRIMINATOR_ENCODED_BCE,
	PSNR,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	Train,
	Validation,
}

impl Phase {
	pub fn name(&self) -> &'static str {
		match self {
			Phase::Train => "train",
			Phase::Validation => "validation",
		}
	}

	pub fn file_name(&self) -> &'static str {
		match self {
			Phase::Train => io::TRAIN_METRICS_FILE,
			Phase::Validation => io::VALIDATION_METRICS_FILE,
		}
	}
}

impl fmt::Display for Phase {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.name())
	}
}

/// Running mean of every metric over the batches of one epoch.
#[derive(Debug, Clone, Default)]
pub struct MetricsAccumulator {
	sums: IndexMap<String, (f64, usize)>,
}

impl MetricsAccumulator {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn reset(&mut self) {
		self.sums.clear();
	}

	pub fn is_empty(&self) -> bool {
		self.sums.is_empty()
	}

	pub fn update(&mut self, name: &str, value: f64) {
		let entry = self.sums.entry(name.to_string()).or_insert((0.0, 0));
		entry.0 += value;
		entry.1 += 1;
	}

	pub fn update_all(&mut self, batch: &IndexMap<String, f64>) {
		for (name, &value) in batch {
			self.update(name, value);
		}
	}

	pub fn mean(&self, name: &str) -> Option<f64> {
		self.sums
			.get(name)
			.filter(|(_, count)| *count > 0)
			.map(|(sum, count)| sum / *count as f64)
	}

	pub fn means(&self) -> IndexMap<String, f64> {
		self.sums
			.iter()
			.filter(|(_, (_, count))| *count > 0)
			.map(|(name, (sum, count))| (name.clone(), sum / *count as f64))
			.collect()
	}

	pub fn finalize(&self, epoch: usize, phase: Phase) -> EpochMetrics {
		EpochMetrics {
			epoch,
			phase,
			values: self.means(),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochMetrics {
	pub epoch: usize,
	pub phase: Phase,
	pub values: IndexMap<String, f64>,
}

impl EpochMetrics {
	pub fn get(&self, name: &str) -> Option<f64> {
		self.values.get(name).copied()
	}
}

impl fmt::Display for EpochMetrics {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "epoch {} [{}]", self.epoch, self.phase)?;
		for (name, value) in &self.values {
			write!(f, " {}={:.4}", name, value)?;
		}
		Ok(())
	}
}

/// Receiver of finalised per-epoch metrics.
pub trait MetricsSink {
	fn record(&mut self, metrics: &EpochMetrics) -> Result<()>;

	/// Called with the incomplete accumulator when a run diverges mid-epoch. Nothing is recorded
	/// by default so that a completed epoch never appears twice after a resume.
	fn flush_partial(&mut self, _metrics: &EpochMetrics) -> Result<()> {
		Ok(())
	}
}

/// Appends one CSV row per epoch to `train.csv` / `validation.csv`, writing the header only when
/// the file is new.
#[derive(Debug, Clone)]
pub struct CsvMetricsLog {
	folder: PathBuf,
}

impl CsvMetricsLog {
	pub fn new(folder: impl AsRef<Path>) -> Self {
		Self {
			folder: folder.as_ref().to_path_buf(),
		}
	}

	pub fn path(&self, phase: Phase) -> PathBuf {
		self.folder.join(phase.file_name())
	}

	/// Drops every row of epoch `start_epoch` or later, keeping the header. A resumed job calls
	/// this before training so that epochs recorded after its last checkpoint are not repeated.
	pub fn truncate_from(&self, start_epoch: usize) -> Result<()> {
		for phase in [Phase::Train, Phase::Validation] {
			let path = self.path(phase);
			if !path.exists() {
				continue;
			}
			let contents = fs::read_to_string(&path)?;
			let mut kept = String::with_capacity(contents.len());
			let mut dropped = 0;
			for (index, line) in contents.lines().enumerate() {
				let epoch = line.split(',').next().and_then(|field| field.trim().parse::<usize>().ok());
				match epoch {
					Some(epoch) if epoch >= start_epoch => dropped += 1,
					Some(_) => {
						kept.push_str(line);
						kept.push('\n');
					}
					None if index == 0 => {
						kept.push_str(line);
						kept.push('\n');
					}
					None => dropped += 1,
				}
			}
			if dropped > 0 {
				warn!(
					path = %path.display(),
					rows = dropped,
					start_epoch,
					"Discarding metrics recorded after the last checkpoint"
				);
				fs::write(&path, kept)?;
			}
		}
		Ok(())
	}
}

impl MetricsSink for CsvMetricsLog {
	fn record(&mut self, metrics: &EpochMetrics) -> Result<()> {
		fs::create_dir_all(&self.folder)?;
		let path = self.path(metrics.phase);
		let is_new = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
		let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
		if is_new {
			let header: Vec<&str> = metrics.values.keys().map(String::as_str).collect();
			writeln!(file, "epoch,{}", header.join(","))?;
		}
		let row: Vec<String> = metrics.values.values().map(|v| format!("{:.6}", v)).collect();
		writeln!(file, "{},{}", metrics.epoch, row.join(","))?;
		Ok(())
	}
}

/// Logs every epoch through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
	fn record(&mut self, metrics: &EpochMetrics) -> Result<()> {
		info!(epoch = metrics.epoch, phase = %metrics.phase, "{}", metrics);
		Ok(())
	}

	fn flush_partial(&mut self, metrics: &EpochMetrics) -> Result<()> {
		warn!(epoch = metrics.epoch, phase = %metrics.phase, "partial metrics before abort: {}", metrics);
		Ok(())
	}
}

/// Publishes every metric as a `watermark_<phase>_<name>` gauge.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaugeSink;

impl MetricsSink for GaugeSink {
	fn record(&mut self, metrics: &EpochMetrics) -> Result<()> {
		for (name, value) in &metrics.values {
			gauge!(format!("watermark_{}_{}", metrics.phase, name.replace('-', "_")), *value);
		}
		gauge!(format!("watermark_{}_epoch", metrics.phase), metrics.epoch as f64);
		Ok(())
	}
}

/// Fans metrics out to several sinks. Every sink is attempted; the first error is returned.
#[derive(Default)]
pub struct SinkSet {
	sinks: Vec<Box<dyn MetricsSink>>,
}

impl SinkSet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, sink: impl MetricsSink + 'static) -> Self {
		self.sinks.push(Box::new(sink));
		self
	}

	pub fn push(&mut self, sink: Box<dyn MetricsSink>) {
		self.sinks.push(sink);
	}

	pub fn len(&self) -> usize {
		self.sinks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.sinks.is_empty()
	}
}

impl MetricsSink for SinkSet {
	fn record(&mut self, metrics: &EpochMetrics) -> Result<()> {
		let mut first_error: Option<WatermarkError> = None;
		for sink in &mut self.sinks {
			if let Err(e) = sink.record(metrics) {
				first_error.get_or_insert(e);
			}
		}
		first_error.map_or(Ok(()), Err)
	}

	fn flush_partial(&mut self, metrics: &EpochMetrics) -> Result<()> {
		let mut first_error: Option<WatermarkError> = None;
		for sink in &mut self.sinks {
			if let Err(e) = sink.flush_partial(metrics) {
				first_error.get_or_insert(e);
			}
		}
		first_error.map_or(Ok(()), Err)
	}
}
