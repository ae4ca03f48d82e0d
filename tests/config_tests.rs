use deep_watermark::config::{Architecture, Device, LossWeights, NetworkShape, UnetShape, WatermarkConfig};
use deep_watermark::config_file::WatermarkConfigFile;
use deep_watermark::error::WatermarkError;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_config_default() {
    let config = WatermarkConfig::default();
    assert_eq!(config.architecture, Architecture::Hidden);
    assert_eq!(config.message_length, 30);
    assert_eq!(config.image_size, 128);
    assert_eq!(config.batch_size, 32);
    assert_eq!(config.epochs, 300);
    assert_eq!(config.learning_rate, 1e-3);
    assert_eq!(config.loss_weights.encoder, 0.7);
    assert_eq!(config.loss_weights.decoder, 1.0);
    assert_eq!(config.loss_weights.adversarial, 1e-3);
    assert_eq!(config.device, Device::Cpu);
    assert!(config.noise.is_empty());
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validate_zero_values() {
    for config in [
        WatermarkConfig::builder().message_length(0).build(),
        WatermarkConfig::builder().image_size(0).build(),
        WatermarkConfig::builder().batch_size(0).build(),
        WatermarkConfig::builder().epochs(0).build(),
        WatermarkConfig::builder().learning_rate(0.0).build(),
        WatermarkConfig::builder().batches_per_epoch(0).build(),
        WatermarkConfig::builder().decoder(NetworkShape::new(0, 64)).build(),
    ] {
        assert!(matches!(config.validate(), Err(WatermarkError::Configuration(_))));
    }
}

#[test]
fn test_config_validate_loss_weights() {
    let config = WatermarkConfig::builder()
        .loss_weights(LossWeights {
            encoder: -0.1,
            ..LossWeights::default()
        })
        .build();
    let result = config.validate();
    assert!(format!("{}", result.unwrap_err()).contains("encoder loss weight"));

    let config = WatermarkConfig::builder()
        .loss_weights(LossWeights {
            adversarial: 0.0,
            ..LossWeights::default()
        })
        .build();
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validate_noise_and_metric() {
    let config = WatermarkConfig::builder().noise("gaussian(0.1)").build();
    assert!(matches!(config.validate(), Err(WatermarkError::Configuration(_))));

    let config = WatermarkConfig::builder().noise("crop(0.1").build();
    assert!(matches!(config.validate(), Err(WatermarkError::Parse(_))));

    let config = WatermarkConfig::builder().best_metric("accuracy").build();
    assert!(matches!(config.validate(), Err(WatermarkError::Configuration(_))));

    let config = WatermarkConfig::builder().best_metric("bitwise-error").build();
    assert!(config.validate().is_ok());
}

#[test]
fn test_unet_depth_is_validated() {
    let config = WatermarkConfig::builder()
        .architecture(Architecture::UnetConv)
        .unet(UnetShape {
            filters: 8,
            down_blocks: 4,
        })
        .build();
    assert!(config.validate().is_err());

    // The shallow shape is irrelevant to the convolutional encoder.
    let config = WatermarkConfig::builder()
        .unet(UnetShape {
            filters: 8,
            down_blocks: 4,
        })
        .build();
    assert!(config.validate().is_ok());
}

#[test]
fn test_architecture_names() {
    assert_eq!("hidden".parse::<Architecture>().unwrap(), Architecture::Hidden);
    assert_eq!("UNET-CONV".parse::<Architecture>().unwrap(), Architecture::UnetConv);
    assert!("unet-down".parse::<Architecture>().is_err());
    assert!("unet-attn".parse::<Architecture>().is_err());
    assert_eq!(Architecture::UnetConv.to_string(), "unet-conv");
    assert!("cuda".parse::<Device>().is_err());
}

#[test]
fn test_builder_derives_job_folders() {
    let config = WatermarkConfig::builder().jobs_folder("/data/jobs").job_name("run-1").build();
    assert_eq!(config.job_folder, PathBuf::from("/data/jobs/run-1"));
    assert_eq!(config.checkpoint_folder, PathBuf::from("/data/jobs/run-1/checkpoints"));

    let config = WatermarkConfig::builder()
        .job_folder("/elsewhere")
        .checkpoint_folder("/fast/ckpt")
        .build();
    assert_eq!(config.job_folder, PathBuf::from("/elsewhere"));
    assert_eq!(config.checkpoint_folder, PathBuf::from("/fast/ckpt"));
}

#[test]
fn test_config_file_toml_and_json() {
    let dir = TempDir::new().unwrap();
    let toml_path = dir.path().join("run.toml");
    std::fs::write(
        &toml_path,
        r#"
[model]
architecture = "unet-conv"
message_length = 16

[training]
epochs = 5

[training.loss_weights]
encoder = 0.5
decoder = 1.0
adversarial = 0.0

[noise]
layers = "cropout(0.3,0.5)+jpeg()"

[data]
train_folder = "/data/train"
"#,
    )
    .unwrap();

    let file = WatermarkConfigFile::from_file(&toml_path).unwrap();
    let config = file.to_config().unwrap();
    assert_eq!(config.architecture, Architecture::UnetConv);
    assert_eq!(config.message_length, 16);
    assert_eq!(config.image_size, 128);
    assert_eq!(config.epochs, 5);
    assert_eq!(config.loss_weights.encoder, 0.5);
    assert_eq!(config.noise, "cropout(0.3,0.5)+jpeg()");

    let json_path = dir.path().join("run.json");
    std::fs::write(&json_path, serde_json::to_string(&file).unwrap()).unwrap();
    let from_json = WatermarkConfigFile::from_file(&json_path).unwrap().to_config().unwrap();
    assert_eq!(from_json.noise, config.noise);
    assert_eq!(from_json.train_folder, Some(PathBuf::from("/data/train")));
}

#[test]
fn test_config_file_round_trip_through_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("example.toml");
    let file: WatermarkConfigFile = toml::from_str(&WatermarkConfigFile::create_example_toml()).unwrap();
    file.to_toml_file(&path).unwrap();

    let reloaded = WatermarkConfigFile::from_toml_file(&path).unwrap();
    assert_eq!(reloaded.model.message_length, file.model.message_length);
    assert_eq!(reloaded.training.loss_weights, file.training.loss_weights);
}

#[test]
fn test_config_file_rejects_bad_noise() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[noise]\nlayers = \"gaussian(1)\"\n\n[data]\ntrain_folder = \"x\"\n").unwrap();
    let file = WatermarkConfigFile::from_file(&path).unwrap();
    assert!(matches!(file.to_config(), Err(WatermarkError::Configuration(_))));
}
