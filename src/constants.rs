pub mod network {
	pub const CHANNELS: usize = 3;
	pub const DEFAULT_MESSAGE_LENGTH: usize = 30;
	pub const DEFAULT_IMAGE_SIZE: usize = 128;
	pub const DEFAULT_ENCODER_BLOCKS: usize = 4;
	pub const DEFAULT_DECODER_BLOCKS: usize = 7;
	pub const DEFAULT_DISCRIMINATOR_BLOCKS: usize = 3;
	pub const DEFAULT_CHANNELS: usize = 64;
	pub const DEFAULT_UNET_FILTERS: usize = 64;
	pub const DEFAULT_UNET_DOWN_BLOCKS: usize = 7;
	pub const MIN_UNET_DOWN_BLOCKS: usize = 5;
	pub const LEAKY_RELU_SLOPE: f32 = 0.2;
}

pub mod training {
	pub const DEFAULT_LEARNING_RATE: f32 = 1e-3;
	pub const DEFAULT_BATCH_SIZE: usize = 32;
	pub const DEFAULT_EPOCHS: usize = 300;
	pub const DEFAULT_ENCODER_LOSS_WEIGHT: f32 = 0.7;
	pub const DEFAULT_DECODER_LOSS_WEIGHT: f32 = 1.0;
	pub const DEFAULT_ADVERSARIAL_LOSS_WEIGHT: f32 = 1e-3;
	pub const ADAM_BETA1: f32 = 0.9;
	pub const ADAM_BETA2: f32 = 0.999;
	pub const ADAM_EPSILON: f32 = 1e-8;
	pub const REAL_LABEL: f32 = 1.0;
	pub const FAKE_LABEL: f32 = 0.0;
}

pub mod noise {
	/// Low-frequency DCT coefficients kept per 8x8 block (Y, then U and V).
	pub const JPEG_KEEP_LUMA: usize = 5;
	pub const JPEG_KEEP_CHROMA: usize = 3;
	pub const JPEG_BLOCK: usize = 8;
	pub const QUANTIZATION_LEVELS: f32 = 255.0;
	pub const BLUR_RADIUS_SIGMAS: f32 = 3.0;
	/// Largest accepted blur sigma, in pixels.
	pub const MAX_BLUR_SIGMA: f32 = 16.0;
}

pub mod checkpoint {
	pub const MAGIC: &[u8; 4] = b"WMCK";
	pub const FORMAT_VERSION: u32 = 1;
	pub const EXTENSION: &str = "wmc";
	pub const LAST_TAG: &str = "last";
	pub const BEST_TAG: &str = "best";
	pub const COMPRESSION_LEVEL: u32 = 6;
}

pub mod io {
	pub const CONFIG_FILE: &str = "config.json";
	pub const CHECKPOINT_DIR: &str = "checkpoints";
	pub const IMAGES_DIR: &str = "images";
	pub const TRAIN_METRICS_FILE: &str = "train.csv";
	pub const VALIDATION_METRICS_FILE: &str = "validation.csv";
	pub const DEFAULT_JOBS_FOLDER: &str = "./jobs";
	pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "tiff", "webp"];
}
