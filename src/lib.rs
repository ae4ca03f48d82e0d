//! Training of neural image watermarking networks.
//!
//! An encoder hides a bit string in a cover image, a chain of noise layers simulates the
//! distortions the image may suffer, and a decoder recovers the bits. A discriminator pushes the
//! encoder towards watermarked images that cannot be told apart from covers.

pub mod cli;
pub mod commands;
pub mod config;
pub mod config_file;
pub mod constants;
pub mod error;
pub mod logging;
pub mod message;
pub mod network;
pub mod nn;
pub mod noise;
pub mod psnr;
pub mod training;
pub mod validation;

pub use error::{Result, WatermarkError};
