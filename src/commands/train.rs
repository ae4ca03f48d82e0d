use std::fs;
use std::path::{Path, PathBuf};

use clap::ArgMatches;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::config::{Architecture, WatermarkConfig};
use crate::config_file::{save_resolved, WatermarkConfigFile};
use crate::constants::io;
use crate::error::{Result, WatermarkError};
use crate::logging::{init_logging, LogConfig, LogFormat, OperationLogger};
use crate::training::{
	CheckpointManager, CheckpointSlot, CoverSource, Cropping, CsvMetricsLog, FitPlan, FitSummary, GaugeSink,
	ImageFolderSource, SinkSet, TracingSink, Trainer,
};
use crate::validation;

/// Starts a new job. Everything that can be rejected (flags, config file, noise specification,
/// network shapes, image folders) is checked before the job folder is created.
pub fn train(architecture: Architecture, app_m: &ArgMatches) -> Result<()> {
	let (config, overridden) = parse_config(architecture, app_m)?;
	let mut trainer = Trainer::from_config(&config)?;
	let mut sources = open_sources(&config)?;
	validation::validate_new_job_folder(&config.job_folder)?;

	fs::create_dir_all(&config.checkpoint_folder)?;
	fs::create_dir_all(config.job_folder.join(io::IMAGES_DIR))?;
	save_resolved(&config, config.job_folder.join(io::CONFIG_FILE))?;

	let _guard = init_job_logging(&config, app_m)?;
	if let Some(file_architecture) = overridden {
		warn!(
			file = %file_architecture,
			command = %config.architecture,
			"Architecture from the command overrides the config file"
		);
	}
	info!(job = %config.job_name, folder = %config.job_folder.display(), "Created training job");
	run_job(&mut trainer, &config, 1, &mut sources)?;
	Ok(())
}

pub(crate) struct Sources {
	train: ImageFolderSource,
	validation: Option<ImageFolderSource>,
}

pub(crate) fn open_sources(config: &WatermarkConfig) -> Result<Sources> {
	let train_folder = config
		.train_folder
		.as_ref()
		.ok_or_else(|| WatermarkError::Configuration("No training folder specified".into()))?;
	validation::validate_directory(train_folder)?;
	let train = ImageFolderSource::new(train_folder, config.image_size, config.batch_size, Cropping::Random)?;
	let validation = config
		.validation_folder
		.as_ref()
		.map(|folder| ImageFolderSource::new(folder, config.image_size, config.batch_size, Cropping::Centre))
		.transpose()?;
	Ok(Sources { train, validation })
}

pub(crate) fn init_job_logging(config: &WatermarkConfig, app_m: &ArgMatches) -> Result<Option<WorkerGuard>> {
	let format = match app_m.value_of("LOG_FORMAT") {
		Some("pretty") => LogFormat::Pretty,
		Some("json") => LogFormat::Json,
		_ => LogFormat::Compact,
	};
	let log_config = LogConfig {
		format,
		..LogConfig::for_job(&config.job_folder, &checkpoint_prefix(config))
	};
	init_logging(log_config).map_err(|e| WatermarkError::Configuration(format!("Could not initialise logging: {}", e)))
}

/// Trains from `start_epoch` to the configured last epoch and exports the final checkpoint.
pub(crate) fn run_job(
	trainer: &mut Trainer,
	config: &WatermarkConfig,
	start_epoch: usize,
	sources: &mut Sources,
) -> Result<FitSummary> {
	let mut operation = OperationLogger::new(checkpoint_prefix(config));
	operation.add_metadata("architecture", config.architecture.name());
	operation.add_metadata("noise", trainer.noise().to_string());
	operation.add_metadata("start_epoch", start_epoch.to_string());

	let checkpoints = CheckpointManager::new(&config.checkpoint_folder, checkpoint_prefix(config));
	let csv = CsvMetricsLog::new(&config.job_folder);
	if start_epoch > 1 {
		csv.truncate_from(start_epoch)?;
	}
	let mut sinks = SinkSet::new()
		.with(csv)
		.with(TracingSink)
		.with(GaugeSink);
	let plan = FitPlan::from_config(config, start_epoch);
	let validation = sources.validation.as_mut().map(|source| source as &mut dyn CoverSource);

	let summary = match trainer.fit(&plan, &mut sources.train, validation, &checkpoints, &mut sinks) {
		Ok(summary) => summary,
		Err(e) => {
			operation.log_error(&e);
			return Err(e);
		}
	};

	if !summary.failed_checkpoints.is_empty() {
		warn!(epochs = ?summary.failed_checkpoints, "Some checkpoints could not be written");
	}
	if let Some(folder) = &config.model_folder {
		export_model(&checkpoints, folder)?;
	}
	operation.complete();
	Ok(summary)
}

/// Copies the `last` checkpoint into `folder`.
fn export_model(checkpoints: &CheckpointManager, folder: &Path) -> Result<()> {
	let source = checkpoints.path(CheckpointSlot::Last);
	if !source.exists() {
		warn!(path = %source.display(), "No checkpoint to export");
		return Ok(());
	}
	fs::create_dir_all(folder)?;
	let target = folder.join(source.file_name().unwrap_or_default());
	fs::copy(&source, &target).map_err(|e| WatermarkError::checkpoint_io(&target, e))?;
	info!(path = %target.display(), "Exported model");
	Ok(())
}

pub(crate) fn checkpoint_prefix(config: &WatermarkConfig) -> String {
	if config.job_name.is_empty() {
		"watermark".to_string()
	} else {
		config.job_name.clone()
	}
}

/// `<timestamp>--<command>[--<noise>][--<suffix>]`, with the noise specification reduced to
/// characters that are safe in folder names.
pub fn job_name(command: &str, noise: &str, suffix: Option<&str>) -> String {
	let mut name = format!("{}--{}", chrono::Local::now().format("%Y.%m.%d--%H-%M-%S"), command);
	let noise: String = noise
		.chars()
		.filter(|c| !c.is_whitespace())
		.map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-') { c } else { '_' })
		.collect();
	let noise = noise.trim_matches('_');
	if !noise.is_empty() {
		name.push_str("--");
		name.push_str(noise);
	}
	if let Some(suffix) = suffix {
		name.push_str("--");
		name.push_str(suffix);
	}
	name
}

/// Resolves the run configuration: the config file (if any) first, then every flag given on the
/// command line, then the job name and folders.
///
/// Also returns the config file's architecture when the command replaced a different one, so the
/// caller can report it once logging is up.
pub fn parse_config(architecture: Architecture, app_m: &ArgMatches) -> Result<(WatermarkConfig, Option<Architecture>)> {
	let mut config = match app_m.value_of("CONFIG") {
		Some(path) => WatermarkConfigFile::from_file(path)?.to_config()?,
		None => WatermarkConfig::default(),
	};
	let overridden = if app_m.value_of("CONFIG").is_some() && config.architecture != architecture {
		Some(config.architecture)
	} else {
		None
	};
	config.architecture = architecture;

	if let Some(value) = app_m.value_of("MESSAGE") {
		config.message_length = validation::validate_positive_int(value, "Message length")?;
	}
	if let Some(value) = app_m.value_of("SIZE") {
		config.image_size = validation::validate_positive_int(value, "Image size")?;
	}
	if let Some(value) = app_m.value_of("BATCH_SIZE") {
		config.batch_size = validation::validate_positive_int(value, "Batch size")?;
	}
	if let Some(value) = app_m.value_of("EPOCHS") {
		config.epochs = validation::validate_positive_int(value, "Epochs")?;
	}
	if let Some(value) = app_m.value_of("LEARNING_RATE") {
		config.learning_rate = validation::validate_positive_float(value, "Learning rate")?;
	}
	if let Some(value) = app_m.value_of("ENCODER_LOSS") {
		config.loss_weights.encoder = validation::validate_non_negative_float(value, "Encoder loss weight")?;
	}
	if let Some(value) = app_m.value_of("DECODER_LOSS") {
		config.loss_weights.decoder = validation::validate_non_negative_float(value, "Decoder loss weight")?;
	}
	if let Some(value) = app_m.value_of("ADVERSARIAL_LOSS") {
		config.loss_weights.adversarial = validation::validate_non_negative_float(value, "Adversarial loss weight")?;
	}
	if let Some(value) = app_m.value_of("UNET_FILTERS") {
		config.unet.filters = validation::validate_positive_int(value, "U-Net filters")?;
	}
	if let Some(value) = app_m.value_of("UNET_DOWN_BLOCKS") {
		config.unet.down_blocks = validation::validate_positive_int(value, "U-Net down blocks")?;
	}
	if let Some(value) = app_m.value_of("NOISE") {
		config.noise = value.to_string();
	}
	if let Some(value) = app_m.value_of("DEVICE") {
		config.device = value.parse()?;
	}
	if let Some(value) = app_m.value_of("SEED") {
		config.seed = Some(
			value
				.parse()
				.map_err(|_| WatermarkError::Parse("Seed must be an unsigned integer".into()))?,
		);
	}
	if let Some(value) = app_m.value_of("BATCHES_PER_EPOCH") {
		config.batches_per_epoch = Some(validation::validate_positive_int(value, "Batches per epoch")?);
	}
	if let Some(value) = app_m.value_of("BEST_METRIC") {
		config.best_metric = Some(value.to_string());
	}
	if let Some(value) = app_m.value_of("DATA_DIR") {
		config.train_folder = Some(PathBuf::from(value));
	}
	if let Some(value) = app_m.value_of("VALIDATION_DIR") {
		config.validation_folder = Some(PathBuf::from(value));
	}
	if let Some(value) = app_m.value_of("JOBS_FOLDER") {
		config.jobs_folder = PathBuf::from(value);
	}
	if let Some(value) = app_m.value_of("MODEL_FOLDER") {
		config.model_folder = Some(PathBuf::from(value));
	}
	if app_m.is_present("NO_PROGRESS") {
		config.show_progress = false;
	}

	if config.job_name.is_empty() || app_m.is_present("NAME") {
		config.job_name = job_name(architecture.name(), &config.noise, app_m.value_of("NAME"));
	}
	config.job_folder = config.jobs_folder.join(&config.job_name);
	config.checkpoint_folder = config.job_folder.join(io::CHECKPOINT_DIR);

	config.validate()?;
	Ok((config, overridden))
}
