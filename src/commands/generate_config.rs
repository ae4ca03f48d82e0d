use crate::config_file::WatermarkConfigFile;
use crate::error::{Result, WatermarkError};
use clap::ArgMatches;
use std::fs;
use std::path::Path;
use tracing::info;

pub fn generate_config(app_m: &ArgMatches) -> Result<()> {
    let output_path = app_m
        .value_of("OUTPUT_FILE")
        .unwrap_or("watermark.toml");

    if Path::new(output_path).exists() && !app_m.is_present("FORCE") {
        return Err(WatermarkError::Configuration(format!(
            "File {} already exists. Use --force to overwrite",
            output_path
        )));
    }

    fs::write(output_path, WatermarkConfigFile::create_example_toml())?;

    info!("Generated example configuration file: {}", output_path);
    info!("You can now edit the configuration file and use it with:");
    info!("  watermark hidden --config {}", output_path);

    Ok(())
}
