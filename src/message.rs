//! Watermark messages: sampling, spatial expansion and bit-error measurement.

use ndarray::{Array2, Array4, ArrayView2, Axis, Zip};
use rand::Rng;

use crate::error::{Result, WatermarkError};

/// Samples a `[batch, length]` matrix of independent, uniformly random bits stored as `0.0` / `1.0`.
pub fn random_messages<R: Rng + ?Sized>(batch: usize, length: usize, rng: &mut R) -> Array2<f32> {
	Array2::from_shape_fn((batch, length), |_| if rng.gen_bool(0.5) { 1.0 } else { 0.0 })
}

/// Broadcasts messages over a spatial grid so they can be concatenated with convolutional feature maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageExpander {
	length: usize,
}

impl MessageExpander {
	pub fn new(length: usize) -> Self {
		Self { length }
	}

	pub fn length(&self) -> usize {
		self.length
	}

	/// Returns `[batch, L, height, width]` where every spatial location holds a copy of the message row.
	pub fn expand(&self, message: ArrayView2<f32>, height: usize, width: usize) -> Result<Array4<f32>> {
		let (batch, length) = message.dim();
		if length != self.length {
			return Err(WatermarkError::ShapeMismatch(format!(
				"message length {} does not match the configured length {}",
				length, self.length
			)));
		}
		let expanded = message
			.insert_axis(Axis(2))
			.insert_axis(Axis(3))
			.broadcast((batch, length, height, width))
			.ok_or_else(|| {
				WatermarkError::ShapeMismatch(format!(
					"cannot broadcast message [{}, {}] to [{}, {}, {}, {}]",
					batch, length, batch, length, height, width
				))
			})?
			.to_owned();
		Ok(expanded)
	}
}

/// Fraction of bits that differ after rounding the decoded values into `{0, 1}`.
pub fn bit_error_rate(decoded: ArrayView2<f32>, message: ArrayView2<f32>) -> Result<f64> {
	if decoded.dim() != message.dim() {
		return Err(WatermarkError::ShapeMismatch(format!(
			"decoded messages {:?} and original messages {:?} differ in shape",
			decoded.dim(),
			message.dim()
		)));
	}
	if message.is_empty() {
		return Ok(0.0);
	}
	let mut errors = 0usize;
	Zip::from(&decoded).and(&message).for_each(|&d, &m| {
		if threshold(d) != threshold(m) {
			errors += 1;
		}
	});
	Ok(errors as f64 / message.len() as f64)
}

fn threshold(value: f32) -> bool {
	value.max(0.0).min(1.0).round() >= 1.0
}

#[cfg(test)]
mod tests {
	use super::*;
	use ndarray::array;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	#[test]
	fn random_messages_are_binary() {
		let mut rng = StdRng::seed_from_u64(7);
		let messages = random_messages(8, 30, &mut rng);
		assert_eq!(messages.dim(), (8, 30));
		assert!(messages.iter().all(|&b| b == 0.0 || b == 1.0));
	}

	#[test]
	fn expand_rejects_wrong_length() {
		let expander = MessageExpander::new(4);
		let message = Array2::<f32>::zeros((2, 3));
		let result = expander.expand(message.view(), 4, 4);
		assert!(matches!(result, Err(WatermarkError::ShapeMismatch(_))));
	}

	#[test]
	fn bit_error_rate_thresholds_decoded_values() {
		let decoded = array![[0.2, 0.7, 1.4, -0.3]];
		let message = array![[0.0, 1.0, 1.0, 1.0]];
		let ber = bit_error_rate(decoded.view(), message.view()).unwrap();
		assert_eq!(ber, 0.25);
	}
}
