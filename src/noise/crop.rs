use std::fmt;

use ndarray::Array4;
use rand::RngCore;

use super::parser::{ratio_ranges_arg, NoiseArg};
use super::region::Region;
use super::{trace_mismatch, NoiseLayer, NoiseTrace};
use crate::error::Result;

/// Keeps a random rectangle of the image and zeroes everything else, so the image shape never changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crop {
	height_ratio: (f32, f32),
	width_ratio: (f32, f32),
}

impl Crop {
	pub fn new(height_ratio: (f32, f32), width_ratio: (f32, f32)) -> Self {
		Self {
			height_ratio,
			width_ratio,
		}
	}

	pub fn from_args(args: &[NoiseArg]) -> Result<Box<dyn NoiseLayer>> {
		let (height_ratio, width_ratio) = ratio_ranges_arg("crop", args)?;
		Ok(Box::new(Self::new(height_ratio, width_ratio)))
	}
}

impl NoiseLayer for Crop {
	fn name(&self) -> &'static str {
		"crop"
	}

	fn forward(
		&self,
		image: &Array4<f32>,
		_cover: &Array4<f32>,
		rng: &mut dyn RngCore,
	) -> Result<(Array4<f32>, NoiseTrace)> {
		let (_, _, height, width) = image.dim();
		let region = Region::random_inside(height, width, self.height_ratio, self.width_ratio, rng);
		Ok((region.keep(image), NoiseTrace::Region(region)))
	}

	fn backward(&self, grad: &Array4<f32>, trace: &NoiseTrace) -> Result<Array4<f32>> {
		match trace {
			NoiseTrace::Region(region) => Ok(region.keep(grad)),
			other => Err(trace_mismatch("crop", other)),
		}
	}
}

impl fmt::Display for Crop {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write_ratio_ranges(f, "crop", self.height_ratio, self.width_ratio)
	}
}

/// `name(min,max)` when both ranges agree, `name((hmin,hmax),(wmin,wmax))` otherwise.
pub(crate) fn write_ratio_ranges(
	f: &mut fmt::Formatter,
	name: &str,
	height: (f32, f32),
	width: (f32, f32),
) -> fmt::Result {
	if height == width {
		write!(f, "{}({},{})", name, height.0, height.1)
	} else {
		write!(f, "{}(({},{}),({},{}))", name, height.0, height.1, width.0, width.1)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	#[test]
	fn pixels_outside_the_region_are_zeroed() {
		let mut rng = StdRng::seed_from_u64(71);
		let crop = Crop::new((0.5, 0.5), (0.25, 0.25));
		let image = Array4::from_elem((2, 3, 8, 8), 0.5);
		let (cropped, trace) = crop.forward(&image, &image, &mut rng).unwrap();
		let region = match trace {
			NoiseTrace::Region(region) => region,
			other => panic!("unexpected trace {:?}", other),
		};
		assert_eq!((region.height, region.width), (4, 2));
		for ((_, _, y, x), &v) in cropped.indexed_iter() {
			assert_eq!(v, if region.contains(y, x) { 0.5 } else { 0.0 });
		}
		let grad = crop.backward(&Array4::ones(image.raw_dim()), &NoiseTrace::Region(region)).unwrap();
		assert_eq!(grad.sum(), (2 * 3 * 4 * 2) as f32);
	}

	#[test]
	fn display_uses_the_short_form_for_equal_ranges() {
		assert_eq!(Crop::new((0.2, 0.3), (0.2, 0.3)).to_string(), "crop(0.2,0.3)");
		assert_eq!(Crop::new((0.2, 0.3), (0.5, 1.0)).to_string(), "crop((0.2,0.3),(0.5,1))");
	}
}
