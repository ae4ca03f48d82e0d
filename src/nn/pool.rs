use ndarray::{Array2, Array4, Axis};

use super::missing_cache;
use crate::error::{Result, WatermarkError};

/// Averages every channel over its spatial extent: `[N, C, H, W] -> [N, C]`.
#[derive(Debug, Clone, Default)]
pub struct GlobalAvgPool {
	spatial: Option<(usize, usize)>,
}

impl GlobalAvgPool {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn forward(&mut self, input: &Array4<f32>) -> Array2<f32> {
		let (_, _, height, width) = input.dim();
		self.spatial = Some((height, width));
		let area = (height * width).max(1) as f32;
		input.sum_axis(Axis(3)).sum_axis(Axis(2)) / area
	}

	pub fn backward(&mut self, grad: &Array2<f32>) -> Result<Array4<f32>> {
		let (height, width) = self.spatial.ok_or_else(|| missing_cache("GlobalAvgPool"))?;
		let (batch, channels) = grad.dim();
		let area = (height * width).max(1) as f32;
		let spread = grad
			.view()
			.insert_axis(Axis(2))
			.insert_axis(Axis(3))
			.broadcast((batch, channels, height, width))
			.ok_or_else(|| WatermarkError::ShapeMismatch("cannot broadcast pooled gradient".to_string()))?
			.mapv(|g| g / area);
		Ok(spread)
	}
}
