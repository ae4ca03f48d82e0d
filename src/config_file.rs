use crate::config::{Architecture, Device, LossWeights, NetworkShape, UnetShape, WatermarkConfig};
use crate::constants::{io, network, training};
use crate::error::{Result, WatermarkError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Training run configuration as written by hand in a TOML or JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkConfigFile {
    /// Network architecture configuration
    #[serde(default)]
    pub model: ModelSection,

    /// Optimisation hyperparameters
    #[serde(default)]
    pub training: TrainingSection,

    /// Attack simulation between encoder and decoder
    #[serde(default)]
    pub noise: NoiseSection,

    /// Image folders (required)
    pub data: DataSection,

    /// Output configuration
    #[serde(default)]
    pub output: OutputSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    /// "hidden" or "unet-conv" (default: "hidden")
    pub architecture: String,

    /// Bits embedded per image (default: 30)
    pub message_length: usize,

    /// Side of the square training patches (default: 128)
    pub image_size: usize,

    /// Compute device (default: "cpu")
    pub device: String,

    pub encoder: NetworkShape,
    pub decoder: NetworkShape,
    pub discriminator: NetworkShape,

    /// Only used by "unet-conv"
    pub unet: UnetShape,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSection {
    /// Learning rate for both Adam optimizers (default: 0.001)
    pub learning_rate: f32,

    /// Training batch size (default: 32)
    pub batch_size: usize,

    /// Last epoch to train (default: 300)
    pub epochs: usize,

    /// RNG seed (optional)
    pub seed: Option<u64>,

    /// Cap on batches per epoch (optional)
    pub batches_per_epoch: Option<usize>,

    /// Metric selecting the best checkpoint, lower is better (optional)
    pub best_metric: Option<String>,

    /// Show a progress bar per epoch (default: true)
    pub show_progress: bool,

    pub loss_weights: LossWeights,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseSection {
    /// Noise pipeline, e.g. "cropout((0.55,0.6),(0.55,0.6))+jpeg()" (default: none)
    pub layers: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSection {
    /// Training images
    pub train_folder: PathBuf,

    /// Validation images (optional)
    #[serde(default)]
    pub validation_folder: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// Folder that receives one sub-folder per job (default: "./jobs")
    pub jobs_folder: PathBuf,

    /// Job name (optional, generated from the timestamp and noise otherwise)
    pub job_name: Option<String>,

    /// Folder the final checkpoint is copied into (optional)
    pub model_folder: Option<PathBuf>,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            architecture: Architecture::Hidden.name().to_string(),
            message_length: network::DEFAULT_MESSAGE_LENGTH,
            image_size: network::DEFAULT_IMAGE_SIZE,
            device: "cpu".to_string(),
            encoder: NetworkShape::new(network::DEFAULT_ENCODER_BLOCKS, network::DEFAULT_CHANNELS),
            decoder: NetworkShape::new(network::DEFAULT_DECODER_BLOCKS, network::DEFAULT_CHANNELS),
            discriminator: NetworkShape::new(network::DEFAULT_DISCRIMINATOR_BLOCKS, network::DEFAULT_CHANNELS),
            unet: UnetShape::default(),
        }
    }
}

impl Default for TrainingSection {
    fn default() -> Self {
        Self {
            learning_rate: training::DEFAULT_LEARNING_RATE,
            batch_size: training::DEFAULT_BATCH_SIZE,
            epochs: training::DEFAULT_EPOCHS,
            seed: None,
            batches_per_epoch: None,
            best_metric: None,
            show_progress: true,
            loss_weights: LossWeights::default(),
        }
    }
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            jobs_folder: PathBuf::from(io::DEFAULT_JOBS_FOLDER),
            job_name: None,
            model_folder: None,
        }
    }
}

impl WatermarkConfigFile {
    /// Load configuration from a TOML or JSON file, chosen by extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_toml_file(path),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;

        toml::from_str(&contents)
            .map_err(|e| WatermarkError::Configuration(format!("Failed to parse TOML config: {}", e)))
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;

        serde_json::from_str(&contents)
            .map_err(|e| WatermarkError::Configuration(format!("Failed to parse JSON config: {}", e)))
    }

    /// Save configuration to a TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| WatermarkError::Serialization(format!("Failed to serialize to TOML: {}", e)))?;

        fs::write(path, contents)?;
        Ok(())
    }

    /// Resolve into a run configuration. The job name and folder are left for the caller to fill in.
    pub fn to_config(&self) -> Result<WatermarkConfig> {
        let architecture: Architecture = self.model.architecture.parse()?;
        let device: Device = self.model.device.parse()?;

        let mut builder = WatermarkConfig::builder()
            .architecture(architecture)
            .device(device)
            .message_length(self.model.message_length)
            .image_size(self.model.image_size)
            .encoder(self.model.encoder)
            .decoder(self.model.decoder)
            .discriminator(self.model.discriminator)
            .unet(self.model.unet)
            .learning_rate(self.training.learning_rate)
            .batch_size(self.training.batch_size)
            .epochs(self.training.epochs)
            .loss_weights(self.training.loss_weights)
            .show_progress(self.training.show_progress)
            .noise(self.noise.layers.clone())
            .train_folder(self.data.train_folder.clone())
            .jobs_folder(self.output.jobs_folder.clone());

        if let Some(seed) = self.training.seed {
            builder = builder.seed(seed);
        }
        if let Some(batches) = self.training.batches_per_epoch {
            builder = builder.batches_per_epoch(batches);
        }
        if let Some(metric) = &self.training.best_metric {
            builder = builder.best_metric(metric.clone());
        }
        if let Some(folder) = &self.data.validation_folder {
            builder = builder.validation_folder(folder.clone());
        }
        if let Some(name) = &self.output.job_name {
            builder = builder.job_name(name.clone());
        }
        if let Some(folder) = &self.output.model_folder {
            builder = builder.model_folder(folder.clone());
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }

    /// Create an example configuration file with comments
    pub fn create_example_toml() -> String {
        r#"# Watermark training configuration

[model]
# "hidden" (convolutional encoder) or "unet-conv" (U-Net generator)
architecture = "hidden"

# Number of bits embedded in every image
message_length = 30

# Training patches are image_size x image_size
image_size = 128

device = "cpu"

[model.encoder]
blocks = 4
channels = 64

[model.decoder]
blocks = 7
channels = 64

[model.discriminator]
blocks = 3
channels = 64

# Only used by "unet-conv"; image_size must be divisible by 2^down_blocks
[model.unet]
filters = 64
down_blocks = 7

[training]
learning_rate = 0.001
batch_size = 32
epochs = 300
show_progress = true

# seed = 42
# batches_per_epoch = 500

# Keep a separate checkpoint of the epoch with the lowest value of this metric
# best_metric = "bitwise-error"

[training.loss_weights]
encoder = 0.7
decoder = 1.0
adversarial = 0.001

[noise]
# Layers applied left to right, e.g. "crop((0.2,0.3),(0.4,0.5))+cropout(0.11,0.22)+jpeg()"
layers = ""

[data]
train_folder = "./data/train"
# validation_folder = "./data/val"

[output]
jobs_folder = "./jobs"
# job_name = "my-run"
# model_folder = "./models"
"#.to_string()
    }
}

/// Writes the fully resolved run configuration, read back by `resume`.
pub fn save_resolved(config: &WatermarkConfig, path: impl AsRef<Path>) -> Result<()> {
    let contents = serde_json::to_string_pretty(config)
        .map_err(|e| WatermarkError::Serialization(format!("Failed to serialize config: {}", e)))?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn load_resolved(path: impl AsRef<Path>) -> Result<WatermarkConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        WatermarkError::Configuration(format!("Cannot read {}: {}", path.display(), e))
    })?;
    let config: WatermarkConfig = serde_json::from_str(&contents)
        .map_err(|e| WatermarkError::Configuration(format!("Failed to parse {}: {}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_example_toml_parses() {
        let file: WatermarkConfigFile = toml::from_str(&WatermarkConfigFile::create_example_toml()).unwrap();
        let config = file.to_config().unwrap();
        assert_eq!(config.architecture, Architecture::Hidden);
        assert_eq!(config.message_length, 30);
        assert_eq!(config.loss_weights.encoder, 0.7);
        assert_eq!(config.train_folder, Some(PathBuf::from("./data/train")));
    }

    #[test]
    fn test_missing_data_section_is_rejected() {
        let result: std::result::Result<WatermarkConfigFile, _> = toml::from_str("[model]\nmessage_length = 8\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_unsupported_architecture() {
        let mut file: WatermarkConfigFile = toml::from_str(&WatermarkConfigFile::create_example_toml()).unwrap();
        file.model.architecture = "unet-down".to_string();
        assert!(matches!(file.to_config(), Err(WatermarkError::Configuration(_))));
    }

    #[test]
    fn test_save_load_resolved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(io::CONFIG_FILE);

        let config = WatermarkConfig::builder()
            .message_length(12)
            .noise("jpeg()")
            .job_name("run")
            .build();
        save_resolved(&config, &path).unwrap();

        let loaded = load_resolved(&path).unwrap();
        assert_eq!(loaded.message_length, 12);
        assert_eq!(loaded.noise, "jpeg()");
        assert_eq!(loaded.job_folder, config.job_folder);
    }
}
