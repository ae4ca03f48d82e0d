use ndarray::{Array4, Zip};

use super::missing_cache;
use crate::error::{Result, WatermarkError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActivationKind {
	Relu,
	LeakyRelu(f32),
	Tanh,
}

/// Element-wise non-linearity. ReLU variants cache their input, `Tanh` caches its output.
#[derive(Debug, Clone)]
pub struct Activation {
	kind: ActivationKind,
	cache: Option<Array4<f32>>,
}

impl Activation {
	pub fn new(kind: ActivationKind) -> Self {
		Self { kind, cache: None }
	}

	pub fn kind(&self) -> ActivationKind {
		self.kind
	}

	pub fn forward(&mut self, input: &Array4<f32>) -> Array4<f32> {
		let output = match self.kind {
			ActivationKind::Relu => input.mapv(|x| x.max(0.0)),
			ActivationKind::LeakyRelu(slope) => input.mapv(|x| if x > 0.0 { x } else { x * slope }),
			ActivationKind::Tanh => input.mapv(f32::tanh),
		};
		self.cache = Some(match self.kind {
			ActivationKind::Tanh => output.clone(),
			_ => input.clone(),
		});
		output
	}

	pub fn backward(&mut self, grad: &Array4<f32>) -> Result<Array4<f32>> {
		let cache = self.cache.as_ref().ok_or_else(|| missing_cache("Activation"))?;
		if cache.dim() != grad.dim() {
			return Err(WatermarkError::ShapeMismatch(format!(
				"activation gradient {:?} does not match cached activation {:?}",
				grad.dim(),
				cache.dim()
			)));
		}
		let mut out = grad.clone();
		match self.kind {
			ActivationKind::Relu => Zip::from(&mut out).and(cache).for_each(|g, &x| {
				if x <= 0.0 {
					*g = 0.0;
				}
			}),
			ActivationKind::LeakyRelu(slope) => Zip::from(&mut out).and(cache).for_each(|g, &x| {
				if x <= 0.0 {
					*g *= slope;
				}
			}),
			ActivationKind::Tanh => Zip::from(&mut out).and(cache).for_each(|g, &y| *g *= 1.0 - y * y),
		}
		Ok(out)
	}
}
