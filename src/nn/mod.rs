//! Minimal CPU layers with explicit backward passes.
//!
//! Each layer caches what it needs from `forward` and consumes it in `backward`. Parameter
//! gradients are accumulated into [`Param::grad`] only when the caller asks for them with
//! [`GradMode::Accumulate`]; a frozen network is back-propagated with [`GradMode::InputOnly`],
//! which still yields the gradient with respect to the layer input.

pub mod activation;
pub mod conv;
pub mod linear;
pub mod loss;
pub mod optim;
pub mod pool;

pub use self::activation::{Activation, ActivationKind};
pub use self::conv::{Conv2d, ConvBlock, ConvTranspose2d};
pub use self::linear::Linear;
pub use self::loss::{bce_with_logits, mse};
pub use self::optim::{Adam, AdamState};
pub use self::pool::GlobalAvgPool;

use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{Result, WatermarkError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradMode {
	/// Accumulate parameter gradients and return the input gradient.
	Accumulate,
	/// Parameters are frozen: only the input gradient is computed.
	InputOnly,
}

/// A trainable tensor and its accumulated gradient.
#[derive(Debug, Clone)]
pub struct Param {
	pub value: ArrayD<f32>,
	pub grad: ArrayD<f32>,
}

impl Param {
	pub fn new(value: ArrayD<f32>) -> Self {
		let grad = ArrayD::zeros(value.raw_dim());
		Self { value, grad }
	}

	pub fn zeros(shape: &[usize]) -> Self {
		Self::new(ArrayD::zeros(IxDyn(shape)))
	}

	/// He-normal initialisation for a layer with `fan_in` inputs per output.
	pub fn he_normal<R: Rng + ?Sized>(shape: &[usize], fan_in: usize, rng: &mut R) -> Self {
		let std = (2.0 / fan_in.max(1) as f32).sqrt();
		Self::new(ArrayD::from_shape_fn(IxDyn(shape), |_| {
			let z: f32 = rng.sample(StandardNormal);
			z * std
		}))
	}

	pub fn zero_grad(&mut self) {
		self.grad.fill(0.0);
	}

	pub fn grad_is_finite(&self) -> bool {
		self.grad.iter().all(|g| g.is_finite())
	}
}

/// Anything owning trainable parameters, in a fixed order.
pub trait Module {
	fn params(&self) -> Vec<&Param>;

	fn params_mut(&mut self) -> Vec<&mut Param>;

	fn zero_grad(&mut self) {
		for param in self.params_mut() {
			param.zero_grad();
		}
	}

	fn parameter_values(&self) -> Vec<ArrayD<f32>> {
		self.params().into_iter().map(|p| p.value.clone()).collect()
	}

	/// Replaces every parameter value; the count and every shape must match the module.
	fn load_parameter_values(&mut self, values: &[ArrayD<f32>]) -> Result<()> {
		let mut params = self.params_mut();
		if params.len() != values.len() {
			return Err(WatermarkError::ShapeMismatch(format!(
				"expected {} parameter tensors, found {}",
				params.len(),
				values.len()
			)));
		}
		for (i, (param, value)) in params.iter().zip(values).enumerate() {
			if param.value.shape() != value.shape() {
				return Err(WatermarkError::ShapeMismatch(format!(
					"parameter {} has shape {:?}, found {:?}",
					i,
					param.value.shape(),
					value.shape()
				)));
			}
		}
		for (param, value) in params.iter_mut().zip(values) {
			param.value.assign(value);
			param.zero_grad();
		}
		Ok(())
	}

	fn num_parameters(&self) -> usize {
		self.params().iter().map(|p| p.value.len()).sum()
	}
}

pub(crate) fn missing_cache(layer: &str) -> WatermarkError {
	WatermarkError::Training(format!("{}: backward called before forward", layer))
}
