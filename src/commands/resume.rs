use std::path::{Path, PathBuf};

use clap::ArgMatches;
use tracing::info;

use super::train::{init_job_logging, open_sources, run_job};
use crate::config::WatermarkConfig;
use crate::config_file::load_resolved;
use crate::constants::io;
use crate::error::Result;
use crate::training::{resume as restore_latest, Trainer};
use crate::validation;

/// Continues the job in `JOB_FOLDER` at the epoch after its newest valid checkpoint.
pub fn resume(app_m: &ArgMatches) -> Result<()> {
	let job_folder = PathBuf::from(app_m.value_of("JOB_FOLDER").unwrap_or("."));
	validation::validate_directory(&job_folder)?;
	let mut config = load_resolved(job_folder.join(io::CONFIG_FILE))?;
	relocate(&mut config, &job_folder);
	if let Some(value) = app_m.value_of("EPOCHS") {
		config.epochs = validation::validate_positive_int(value, "Epochs")?;
	}
	if app_m.is_present("NO_PROGRESS") {
		config.show_progress = false;
	}

	let mut trainer = Trainer::from_config(&config)?;
	let (start_epoch, handle) = restore_latest(trainer.model_mut(), &config.checkpoint_folder)?;
	let mut sources = open_sources(&config)?;

	let _guard = init_job_logging(&config, app_m)?;
	info!(
		job = %config.job_name,
		checkpoint = %handle.path.display(),
		start_epoch,
		"Resuming training job"
	);
	if start_epoch > config.epochs {
		info!(epochs = config.epochs, "Job already completed all epochs");
		return Ok(());
	}
	run_job(&mut trainer, &config, start_epoch, &mut sources)?;
	Ok(())
}

/// The job may have been moved since it was created; folders inside it follow the given path.
fn relocate(config: &mut WatermarkConfig, job_folder: &Path) {
	if config.checkpoint_folder == config.job_folder.join(io::CHECKPOINT_DIR) {
		config.checkpoint_folder = job_folder.join(io::CHECKPOINT_DIR);
	}
	config.job_folder = job_folder.to_path_buf();
}
