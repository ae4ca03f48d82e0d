use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};

pub fn build_cli() -> ArgMatches<'static> {
	build_app().get_matches()
}

pub fn build_app() -> App<'static, 'static> {
	App::new("watermark")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Trains neural networks that embed and recover invisible bit-string watermarks in images")
		.settings(&[AppSettings::SubcommandRequiredElseHelp, AppSettings::VersionlessSubcommands])
		.subcommand(build_train_subcommand("hidden", "Train the convolutional HiDDeN encoder"))
		.subcommand(
			build_train_subcommand("unet-conv", "Train the U-Net encoder")
				.arg(build_unet_filters_arg())
				.arg(build_unet_down_blocks_arg()),
		)
		.subcommand(build_resume_subcommand())
		.subcommand(build_generate_config_subcommand())
}

fn build_train_subcommand(name: &'static str, about: &'static str) -> App<'static, 'static> {
	SubCommand::with_name(name)
		.about(about)
		.arg(build_config_arg())
		.arg(build_data_dir_arg())
		.arg(build_validation_dir_arg())
		.arg(build_message_arg())
		.arg(build_size_arg())
		.arg(build_batch_size_arg())
		.arg(build_epochs_arg())
		.arg(build_learning_rate_arg())
		.arg(build_loss_weight_arg("ENCODER_LOSS", "encoder-loss", "Weight of the image distortion loss. Default: 0.7"))
		.arg(build_loss_weight_arg("DECODER_LOSS", "decoder-loss", "Weight of the message recovery loss. Default: 1"))
		.arg(build_loss_weight_arg("ADVERSARIAL_LOSS", "adversarial-loss", "Weight of the adversarial loss. Default: 0.001"))
		.arg(build_noise_arg())
		.arg(build_name_arg())
		.arg(build_jobs_folder_arg())
		.arg(build_model_folder_arg())
		.arg(build_seed_arg())
		.arg(build_batches_per_epoch_arg())
		.arg(build_best_metric_arg())
		.arg(build_device_arg())
		.arg(build_no_progress_arg())
		.arg(build_log_format_arg())
}

fn build_resume_subcommand() -> App<'static, 'static> {
	SubCommand::with_name("resume")
		.about("Continue a training job from its latest checkpoint")
		.arg(
			Arg::with_name("JOB_FOLDER")
				.required(true)
				.index(1)
				.help("Folder of the job to continue, containing config.json and checkpoints/"),
		)
		.arg(build_epochs_arg().help("Train until this epoch instead of the configured one"))
		.arg(build_no_progress_arg())
		.arg(build_log_format_arg())
}

fn build_generate_config_subcommand() -> App<'static, 'static> {
	SubCommand::with_name("generate-config")
		.about("Write an example training configuration file")
		.arg(
			Arg::with_name("OUTPUT_FILE")
				.required(true)
				.index(1)
				.help("Configuration file to write (.toml)"),
		)
		.arg(Arg::with_name("FORCE").long("force").help("Overwrite an existing file"))
}

fn build_config_arg() -> Arg<'static, 'static> {
	Arg::with_name("CONFIG")
		.long("config")
		.value_name("FILE")
		.help("Reads settings from a TOML or JSON file; flags given on the command line take precedence")
		.empty_values(false)
}

fn build_data_dir_arg() -> Arg<'static, 'static> {
	Arg::with_name("DATA_DIR")
		.short("d")
		.long("data-dir")
		.value_name("FOLDER")
		.help("Images from this folder (or sub-folders) are used for training")
		.empty_values(false)
}

fn build_validation_dir_arg() -> Arg<'static, 'static> {
	Arg::with_name("VALIDATION_DIR")
		.long("validation-dir")
		.value_name("FOLDER")
		.help("Images from this folder are used to report validation metrics after each epoch")
		.empty_values(false)
}

fn build_message_arg() -> Arg<'static, 'static> {
	Arg::with_name("MESSAGE")
		.short("m")
		.long("message")
		.value_name("BITS")
		.help("Length of the embedded message in bits. Default: 30")
		.empty_values(false)
}

fn build_size_arg() -> Arg<'static, 'static> {
	Arg::with_name("SIZE")
		.short("s")
		.long("size")
		.value_name("PIXELS")
		.help("Side of the square training patches. Default: 128")
		.empty_values(false)
}

fn build_batch_size_arg() -> Arg<'static, 'static> {
	Arg::with_name("BATCH_SIZE")
		.short("b")
		.long("batch-size")
		.help("Number of images per batch. Default: 32")
		.empty_values(false)
}

fn build_epochs_arg() -> Arg<'static, 'static> {
	Arg::with_name("EPOCHS")
		.short("e")
		.long("epochs")
		.help("Number of epochs to train. Default: 300")
		.empty_values(false)
}

fn build_learning_rate_arg() -> Arg<'static, 'static> {
	Arg::with_name("LEARNING_RATE")
		.short("r")
		.long("rate")
		.help("Learning rate of both Adam optimizers. Default: 0.001")
		.empty_values(false)
}

fn build_loss_weight_arg(name: &'static str, long: &'static str, help: &'static str) -> Arg<'static, 'static> {
	Arg::with_name(name).long(long).value_name("WEIGHT").help(help).empty_values(false)
}

fn build_noise_arg() -> Arg<'static, 'static> {
	Arg::with_name("NOISE")
		.long("noise")
		.value_name("SPEC")
		.help("Noise layers between encoder and decoder, e.g. 'crop((0.2,0.3),(0.4,0.5))+cropout(0.11,0.22)+jpeg()'")
}

fn build_name_arg() -> Arg<'static, 'static> {
	Arg::with_name("NAME")
		.long("name")
		.value_name("SUFFIX")
		.help("Suffix appended to the generated job name")
		.empty_values(false)
}

fn build_jobs_folder_arg() -> Arg<'static, 'static> {
	Arg::with_name("JOBS_FOLDER")
		.long("jobs-folder")
		.value_name("FOLDER")
		.help("Folder that receives one sub-folder per job. Default: ./jobs")
		.empty_values(false)
}

fn build_model_folder_arg() -> Arg<'static, 'static> {
	Arg::with_name("MODEL_FOLDER")
		.long("model-folder")
		.value_name("FOLDER")
		.help("The final checkpoint is copied into this folder after training")
		.empty_values(false)
}

fn build_seed_arg() -> Arg<'static, 'static> {
	Arg::with_name("SEED").long("seed").help("Seed for initialisation, sampling and noise").empty_values(false)
}

fn build_batches_per_epoch_arg() -> Arg<'static, 'static> {
	Arg::with_name("BATCHES_PER_EPOCH")
		.long("batches-per-epoch")
		.help("Limits the number of batches in each epoch")
		.empty_values(false)
}

fn build_best_metric_arg() -> Arg<'static, 'static> {
	Arg::with_name("BEST_METRIC")
		.long("best-metric")
		.value_name("METRIC")
		.help("Keeps a 'best' checkpoint of the epoch with the lowest value of this metric")
		.possible_values(crate::training::metrics::METRIC_NAMES)
}

fn build_device_arg() -> Arg<'static, 'static> {
	Arg::with_name("DEVICE")
		.long("device")
		.help("Compute device. Default: cpu")
		.empty_values(false)
}

fn build_no_progress_arg() -> Arg<'static, 'static> {
	Arg::with_name("NO_PROGRESS").long("no-progress").help("Hides the per-epoch progress bar")
}

fn build_log_format_arg() -> Arg<'static, 'static> {
	Arg::with_name("LOG_FORMAT")
		.long("log-format")
		.help("Console log format. Default: compact")
		.possible_values(&["compact", "pretty", "json"])
}

fn build_unet_filters_arg() -> Arg<'static, 'static> {
	Arg::with_name("UNET_FILTERS")
		.long("filters")
		.help("Filters of the outermost U-Net level. Default: 64")
		.empty_values(false)
}

fn build_unet_down_blocks_arg() -> Arg<'static, 'static> {
	Arg::with_name("UNET_DOWN_BLOCKS")
		.long("down-blocks")
		.help("Number of U-Net levels, at least 5. Default: 7")
		.empty_values(false)
}
