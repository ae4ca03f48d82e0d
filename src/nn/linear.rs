use ndarray::{Array2, Axis, Ix1, Ix2};
use rand::Rng;

use super::{missing_cache, GradMode, Module, Param};
use crate::error::{Result, WatermarkError};

/// Fully connected layer on `[N, in]` matrices.
#[derive(Debug, Clone)]
pub struct Linear {
	weight: Param,
	bias: Param,
	in_features: usize,
	out_features: usize,
	input: Option<Array2<f32>>,
}

impl Linear {
	pub fn new<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
		Self {
			weight: Param::he_normal(&[out_features, in_features], in_features, rng),
			bias: Param::zeros(&[out_features]),
			in_features,
			out_features,
			input: None,
		}
	}

	pub fn out_features(&self) -> usize {
		self.out_features
	}

	pub fn forward(&mut self, input: &Array2<f32>) -> Result<Array2<f32>> {
		if input.ncols() != self.in_features {
			return Err(WatermarkError::ShapeMismatch(format!(
				"Linear expects {} features, got {}",
				self.in_features,
				input.ncols()
			)));
		}
		let weight = self.weight.value.view().into_dimensionality::<Ix2>()?;
		let bias = self.bias.value.view().into_dimensionality::<Ix1>()?;
		let output = input.dot(&weight.t()) + &bias;
		self.input = Some(input.clone());
		Ok(output)
	}

	pub fn backward(&mut self, grad: &Array2<f32>, mode: GradMode) -> Result<Array2<f32>> {
		let input = self.input.as_ref().ok_or_else(|| missing_cache("Linear"))?;
		if grad.dim() != (input.nrows(), self.out_features) {
			return Err(WatermarkError::ShapeMismatch(format!(
				"Linear gradient has shape {:?}, expected {:?}",
				grad.dim(),
				(input.nrows(), self.out_features)
			)));
		}
		let weight = self.weight.value.view().into_dimensionality::<Ix2>()?;
		let grad_input = grad.dot(&weight);
		if mode == GradMode::Accumulate {
			let grad_weight = grad.t().dot(input);
			let grad_bias = grad.sum_axis(Axis(0));
			self.weight.grad += &grad_weight.into_dyn();
			self.bias.grad += &grad_bias.into_dyn();
		}
		Ok(grad_input)
	}
}

impl Module for Linear {
	fn params(&self) -> Vec<&Param> {
		vec![&self.weight, &self.bias]
	}

	fn params_mut(&mut self) -> Vec<&mut Param> {
		vec![&mut self.weight, &mut self.bias]
	}
}
