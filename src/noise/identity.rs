use std::fmt;

use ndarray::Array4;
use rand::RngCore;

use super::parser::{no_args, NoiseArg};
use super::{NoiseLayer, NoiseTrace};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Identity {
	pub fn from_args(args: &[NoiseArg]) -> Result<Box<dyn NoiseLayer>> {
		no_args("identity", args)?;
		Ok(Box::new(Identity))
	}
}

impl NoiseLayer for Identity {
	fn name(&self) -> &'static str {
		"identity"
	}

	fn forward(
		&self,
		image: &Array4<f32>,
		_cover: &Array4<f32>,
		_rng: &mut dyn RngCore,
	) -> Result<(Array4<f32>, NoiseTrace)> {
		Ok((image.clone(), NoiseTrace::Stateless))
	}

	fn backward(&self, grad: &Array4<f32>, _trace: &NoiseTrace) -> Result<Array4<f32>> {
		Ok(grad.clone())
	}
}

impl fmt::Display for Identity {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "identity()")
	}
}
