use ndarray::{Array4, ArrayView3, Axis, Zip};

use crate::error::{Result, WatermarkError};

/// Returned when two images are identical.
pub const MAX_PSNR: f64 = 100.0;

/// Takes two tensors of shape [3, H, W] with values in [-1, 1] and
/// returns the err, y_err and pixel count of a pair of images.
///
/// Errors are measured after mapping both images to [0, 1].
pub fn psnr_calculation(image1: ArrayView3<f32>, image2: ArrayView3<f32>) -> (f32, f32, f32) {
	let mut rgb_error = 0.0;
	let mut luma_error = 0.0;
	let mut pixel_count = 0.0f32;

	let image1 = image1.permuted_axes([1, 2, 0]);
	let image2 = image2.permuted_axes([1, 2, 0]);
	Zip::from(image1.lanes(Axis(2)))
		.and(image2.lanes(Axis(2)))
		.for_each(|a, b| {
			let r_diff = to_unit(a[0]) - to_unit(b[0]);
			let g_diff = to_unit(a[1]) - to_unit(b[1]);
			let b_diff = to_unit(a[2]) - to_unit(b[2]);

			// BT.601 luma coefficients
			let luma_diff = r_diff * 0.299 + g_diff * 0.587 + b_diff * 0.114;

			luma_error += luma_diff * luma_diff;
			rgb_error += (r_diff * r_diff + g_diff * g_diff + b_diff * b_diff) / 3.0;
			pixel_count += 1.0;
		});

	(rgb_error, luma_error, pixel_count)
}

/// Mean PSNR in dB over the images of two `[N, 3, H, W]` batches.
pub fn batch_psnr(reference: &Array4<f32>, distorted: &Array4<f32>) -> Result<f64> {
	if reference.dim() != distorted.dim() || reference.shape()[1] != 3 {
		return Err(WatermarkError::ShapeMismatch(format!(
			"cannot compare {:?} with {:?}",
			reference.shape(),
			distorted.shape()
		)));
	}
	let batch = reference.shape()[0];
	if batch == 0 {
		return Ok(MAX_PSNR);
	}
	let total: f64 = reference
		.axis_iter(Axis(0))
		.zip(distorted.axis_iter(Axis(0)))
		.map(|(a, b)| {
			let (err, _, count) = psnr_calculation(a, b);
			psnr_from_mse(f64::from(err) / f64::from(count.max(1.0)))
		})
		.sum();
	Ok(total / batch as f64)
}

pub fn psnr_from_mse(mse: f64) -> f64 {
	if mse <= 0.0 {
		MAX_PSNR
	} else {
		(-10.0 * mse.log10()).min(MAX_PSNR)
	}
}

fn to_unit(value: f32) -> f32 {
	((value + 1.0) * 0.5).max(0.0).min(1.0)
}
