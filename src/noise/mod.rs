//! Differentiable noise layers simulating attacks on watermarked images.
//!
//! A [`NoisePipeline`] is parsed from a `name(args)+name(args)` string and applies its layers left to
//! right. Every layer sees the current image and the untouched cover, draws fresh randomness on each
//! call and returns a [`NoiseTrace`] recording that randomness, so that the backward pass routes the
//! gradient through exactly the perturbation that was applied.

pub mod blur;
pub mod crop;
pub mod cropout;
pub mod dropout;
pub mod identity;
pub mod jpeg;
pub mod parser;
pub mod quantization;
pub mod region;
pub mod resize;

pub use self::blur::GaussianBlur;
pub use self::crop::Crop;
pub use self::cropout::Cropout;
pub use self::dropout::Dropout;
pub use self::identity::Identity;
pub use self::jpeg::JpegMask;
pub use self::parser::{registered_layers, NoiseArg, NoiseToken};
pub use self::quantization::Quantization;
pub use self::region::Region;
pub use self::resize::Resize;

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, Array4};
use rand::RngCore;

use crate::error::{Result, WatermarkError};

/// What a stochastic layer drew during `forward`.
#[derive(Debug, Clone, PartialEq)]
pub enum NoiseTrace {
	Stateless,
	Region(Region),
	/// Per-pixel selection `[H, W]`: `true` where the watermarked pixel was kept.
	PixelMask(Array2<bool>),
	/// Source row / column of every output pixel.
	Resample { rows: Vec<usize>, cols: Vec<usize> },
	Kernel(Vec<f32>),
}

pub trait NoiseLayer: fmt::Debug + fmt::Display + Send {
	fn name(&self) -> &'static str;

	/// Perturbs `image`; `cover` is the original image the watermark was embedded into.
	fn forward(
		&self,
		image: &Array4<f32>,
		cover: &Array4<f32>,
		rng: &mut dyn RngCore,
	) -> Result<(Array4<f32>, NoiseTrace)>;

	/// Gradient with respect to `image`, given the gradient of the output.
	fn backward(&self, grad: &Array4<f32>, trace: &NoiseTrace) -> Result<Array4<f32>>;
}

pub(crate) fn trace_mismatch(layer: &str, trace: &NoiseTrace) -> WatermarkError {
	WatermarkError::Training(format!("{} cannot back-propagate through {:?}", layer, trace))
}

pub(crate) fn check_same_shape(image: &Array4<f32>, cover: &Array4<f32>) -> Result<()> {
	if image.dim() != cover.dim() {
		return Err(WatermarkError::ShapeMismatch(format!(
			"noised image {:?} and cover {:?} differ in shape",
			image.dim(),
			cover.dim()
		)));
	}
	Ok(())
}

/// Traces of one pipeline pass, one per layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineTrace {
	traces: Vec<NoiseTrace>,
}

impl PipelineTrace {
	pub fn traces(&self) -> &[NoiseTrace] {
		&self.traces
	}
}

#[derive(Debug, Default)]
pub struct NoisePipeline {
	layers: Vec<Box<dyn NoiseLayer>>,
}

impl NoisePipeline {
	/// An empty pipeline: `apply(x, cover) == x`.
	pub fn identity() -> Self {
		Self::default()
	}

	pub fn from_layers(layers: Vec<Box<dyn NoiseLayer>>) -> Self {
		Self { layers }
	}

	/// Builds the pipeline described by `spec`. Unknown layer names are configuration errors, malformed
	/// syntax and argument lists are parse errors.
	pub fn parse(spec: &str) -> Result<Self> {
		let tokens = parser::tokenize(spec)?;
		let layers = tokens.iter().map(parser::build_layer).collect::<Result<Vec<_>>>()?;
		Ok(Self { layers })
	}

	pub fn len(&self) -> usize {
		self.layers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.layers.is_empty()
	}

	pub fn layers(&self) -> &[Box<dyn NoiseLayer>] {
		&self.layers
	}

	pub fn names(&self) -> Vec<&'static str> {
		self.layers.iter().map(|layer| layer.name()).collect()
	}

	pub fn apply(&self, image: &Array4<f32>, cover: &Array4<f32>, rng: &mut dyn RngCore) -> Result<Array4<f32>> {
		self.forward(image, cover, rng).map(|(noised, _)| noised)
	}

	pub fn forward(
		&self,
		image: &Array4<f32>,
		cover: &Array4<f32>,
		rng: &mut dyn RngCore,
	) -> Result<(Array4<f32>, PipelineTrace)> {
		check_same_shape(image, cover)?;
		let mut current = image.clone();
		let mut traces = Vec::with_capacity(self.layers.len());
		for layer in &self.layers {
			let (noised, trace) = layer.forward(&current, cover, rng)?;
			if noised.dim() != current.dim() {
				return Err(WatermarkError::ShapeMismatch(format!(
					"noise layer {} changed the image shape from {:?} to {:?}",
					layer,
					current.dim(),
					noised.dim()
				)));
			}
			current = noised;
			traces.push(trace);
		}
		Ok((current, PipelineTrace { traces }))
	}

	pub fn backward(&self, grad: &Array4<f32>, trace: &PipelineTrace) -> Result<Array4<f32>> {
		if trace.traces.len() != self.layers.len() {
			return Err(WatermarkError::Training(format!(
				"pipeline trace has {} entries for {} layers",
				trace.traces.len(),
				self.layers.len()
			)));
		}
		let mut grad = grad.clone();
		for (layer, layer_trace) in self.layers.iter().zip(&trace.traces).rev() {
			grad = layer.backward(&grad, layer_trace)?;
		}
		Ok(grad)
	}
}

impl FromStr for NoisePipeline {
	type Err = WatermarkError;

	fn from_str(s: &str) -> Result<Self> {
		Self::parse(s)
	}
}

impl fmt::Display for NoisePipeline {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for (i, layer) in self.layers.iter().enumerate() {
			if i > 0 {
				write!(f, "+")?;
			}
			write!(f, "{}", layer)?;
		}
		Ok(())
	}
}
