use ndarray::{ArrayD, Zip};
use serde::{Deserialize, Serialize};

use super::Param;
use crate::constants::training::{ADAM_BETA1, ADAM_BETA2, ADAM_EPSILON};
use crate::error::{Result, WatermarkError};

/// Everything Adam needs to resume exactly where it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdamState {
	pub step: u64,
	pub first_moments: Vec<ArrayD<f32>>,
	pub second_moments: Vec<ArrayD<f32>>,
}

#[derive(Debug, Clone)]
pub struct Adam {
	learning_rate: f32,
	beta1: f32,
	beta2: f32,
	epsilon: f32,
	state: AdamState,
}

impl Adam {
	pub fn new(learning_rate: f32, params: &[&Param]) -> Self {
		let zeros: Vec<ArrayD<f32>> = params.iter().map(|p| ArrayD::zeros(p.value.raw_dim())).collect();
		Self {
			learning_rate,
			beta1: ADAM_BETA1,
			beta2: ADAM_BETA2,
			epsilon: ADAM_EPSILON,
			state: AdamState {
				step: 0,
				first_moments: zeros.clone(),
				second_moments: zeros,
			},
		}
	}

	pub fn learning_rate(&self) -> f32 {
		self.learning_rate
	}

	pub fn state(&self) -> &AdamState {
		&self.state
	}

	/// Replaces the moment estimates, e.g. when resuming from a checkpoint.
	pub fn load_state(&mut self, state: AdamState) -> Result<()> {
		if state.first_moments.len() != self.state.first_moments.len()
			|| state.second_moments.len() != self.state.second_moments.len()
		{
			return Err(WatermarkError::ShapeMismatch(format!(
				"optimizer state holds {} tensors, expected {}",
				state.first_moments.len(),
				self.state.first_moments.len()
			)));
		}
		let moments = self.state.first_moments.iter().chain(&self.state.second_moments);
		let incoming = state.first_moments.iter().chain(&state.second_moments);
		for (current, new) in moments.zip(incoming) {
			if current.shape() != new.shape() {
				return Err(WatermarkError::ShapeMismatch(format!(
					"optimizer moment has shape {:?}, expected {:?}",
					new.shape(),
					current.shape()
				)));
			}
		}
		self.state = state;
		Ok(())
	}

	/// Applies one update using the gradients currently stored in `params`.
	pub fn step(&mut self, params: &mut [&mut Param]) -> Result<()> {
		if params.len() != self.state.first_moments.len() {
			return Err(WatermarkError::ShapeMismatch(format!(
				"optimizer tracks {} tensors, received {}",
				self.state.first_moments.len(),
				params.len()
			)));
		}
		for (param, first) in params.iter().zip(&self.state.first_moments) {
			if param.value.shape() != first.shape() || param.grad.shape() != first.shape() {
				return Err(WatermarkError::ShapeMismatch(format!(
					"parameter of shape {:?} does not match optimizer moment {:?}",
					param.value.shape(),
					first.shape()
				)));
			}
		}

		self.state.step += 1;
		let t = self.state.step as f32;
		let correction1 = 1.0 - self.beta1.powf(t);
		let correction2 = 1.0 - self.beta2.powf(t);
		let (lr, beta1, beta2, eps) = (self.learning_rate, self.beta1, self.beta2, self.epsilon);

		let moments = self.state.first_moments.iter_mut().zip(self.state.second_moments.iter_mut());
		for (param, (m, v)) in params.iter_mut().zip(moments) {
			let param: &mut Param = param;
			Zip::from(&mut param.value)
				.and(m)
				.and(v)
				.and(&param.grad)
				.for_each(|w, m, v, &g| {
					*m = beta1 * *m + (1.0 - beta1) * g;
					*v = beta2 * *v + (1.0 - beta2) * g * g;
					let m_hat = *m / correction1;
					let v_hat = *v / correction2;
					*w -= lr * m_hat / (v_hat.sqrt() + eps);
				});
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ndarray::IxDyn;

	#[test]
	fn first_step_moves_against_gradient_by_learning_rate() {
		let mut param = Param::new(ArrayD::from_elem(IxDyn(&[2]), 1.0));
		param.grad.assign(&ArrayD::from_shape_vec(IxDyn(&[2]), vec![0.5, -2.0]).unwrap());
		let mut adam = Adam::new(0.1, &[&param]);
		adam.step(&mut [&mut param]).unwrap();
		assert!((param.value[&[0usize][..]] - 0.9).abs() < 1e-4);
		assert!((param.value[&[1usize][..]] - 1.1).abs() < 1e-4);
		assert_eq!(adam.state().step, 1);
	}

	#[test]
	fn load_state_rejects_mismatched_shapes() {
		let param = Param::zeros(&[3]);
		let mut adam = Adam::new(0.1, &[&param]);
		let bad = AdamState {
			step: 4,
			first_moments: vec![ArrayD::zeros(IxDyn(&[2]))],
			second_moments: vec![ArrayD::zeros(IxDyn(&[2]))],
		};
		assert!(adam.load_state(bad).is_err());
		assert_eq!(adam.state().step, 0);
	}
}
