//! Losses returning both the scalar value and the gradient with respect to the prediction.

use ndarray::{Array, Array2, Dimension};

use crate::error::{Result, WatermarkError};

/// Mean squared error over every element.
pub fn mse<D: Dimension>(prediction: &Array<f32, D>, target: &Array<f32, D>) -> Result<(f32, Array<f32, D>)> {
	if prediction.shape() != target.shape() {
		return Err(WatermarkError::ShapeMismatch(format!(
			"mse operands differ in shape: {:?} vs {:?}",
			prediction.shape(),
			target.shape()
		)));
	}
	let count = prediction.len();
	if count == 0 {
		return Ok((0.0, prediction.clone()));
	}
	let diff = prediction - target;
	let loss = diff.iter().map(|d| d * d).sum::<f32>() / count as f32;
	let grad = diff * (2.0 / count as f32);
	Ok((loss, grad))
}

/// Binary cross-entropy on raw logits against a constant label, averaged over the batch.
///
/// Uses `max(x, 0) - x * t + ln(1 + e^-|x|)` so large logits cannot overflow.
pub fn bce_with_logits(logits: &Array2<f32>, target: f32) -> (f32, Array2<f32>) {
	let count = logits.len();
	if count == 0 {
		return (0.0, logits.clone());
	}
	let loss = logits
		.iter()
		.map(|&x| x.max(0.0) - x * target + (-x.abs()).exp().ln_1p())
		.sum::<f32>()
		/ count as f32;
	let grad = logits.mapv(|x| (sigmoid(x) - target) / count as f32);
	(loss, grad)
}

pub fn sigmoid(x: f32) -> f32 {
	if x >= 0.0 {
		1.0 / (1.0 + (-x).exp())
	} else {
		let e = x.exp();
		e / (1.0 + e)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ndarray::array;

	#[test]
	fn mse_of_identical_tensors_is_zero() {
		let a = array![[1.0f32, 2.0], [3.0, 4.0]];
		let (loss, grad) = mse(&a, &a).unwrap();
		assert_eq!(loss, 0.0);
		assert!(grad.iter().all(|&g| g == 0.0));
	}

	#[test]
	fn mse_gradient_is_scaled_difference() {
		let a = array![1.0f32, 3.0];
		let b = array![0.0f32, 0.0];
		let (loss, grad) = mse(&a, &b).unwrap();
		assert_eq!(loss, 5.0);
		assert_eq!(grad, array![1.0, 3.0]);
	}

	#[test]
	fn bce_matches_naive_formula_for_small_logits() {
		let logits = array![[0.3f32], [-1.2]];
		let (loss, grad) = bce_with_logits(&logits, 1.0);
		let naive = -(sigmoid(0.3).ln() + sigmoid(-1.2).ln()) / 2.0;
		assert!((loss - naive).abs() < 1e-6);
		assert!((grad[[0, 0]] - (sigmoid(0.3) - 1.0) / 2.0).abs() < 1e-7);
	}

	#[test]
	fn bce_is_finite_for_extreme_logits() {
		let logits = array![[1000.0f32], [-1000.0]];
		let (loss, grad) = bce_with_logits(&logits, 0.0);
		assert!(loss.is_finite());
		assert!(grad.iter().all(|g| g.is_finite()));
	}
}
