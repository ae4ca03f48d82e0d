use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatermarkError {
	#[error("IO error: {0}")]
	Io(#[from] io::Error),

	#[error("Image processing error: {0}")]
	Image(#[from] image::ImageError),

	#[error("Configuration error: {0}")]
	Configuration(String),

	#[error("Parse error: {0}")]
	Parse(String),

	#[error("Shape mismatch: {0}")]
	ShapeMismatch(String),

	#[error("Numeric divergence: {metric} = {value}")]
	NumericDivergence { metric: String, value: f32 },

	#[error("Checkpoint IO error ({}): {message}", .path.display())]
	CheckpointIo { path: PathBuf, message: String },

	#[error("Checkpoint version mismatch: {0}")]
	CheckpointVersionMismatch(String),

	#[error("No valid checkpoint found in {}", .0.display())]
	CheckpointNotFound(PathBuf),

	#[error("Serialization error: {0}")]
	Serialization(String),

	#[error("Training error: {0}")]
	Training(String),
}

impl WatermarkError {
	/// Only checkpoint writes may fail without ending the run; the next epoch boundary retries them.
	pub fn is_recoverable(&self) -> bool {
		matches!(self, WatermarkError::CheckpointIo { .. })
	}

	pub fn checkpoint_io(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
		WatermarkError::CheckpointIo {
			path: path.into(),
			message: err.to_string(),
		}
	}
}

impl From<ndarray::ShapeError> for WatermarkError {
	fn from(err: ndarray::ShapeError) -> Self {
		WatermarkError::ShapeMismatch(err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, WatermarkError>;
