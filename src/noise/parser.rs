//! The noise mini-language: `name(arg, ...)+name(...)`, where each argument is a number or a
//! parenthesised tuple of numbers.

use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use indexmap::IndexMap;

use super::{Crop, Cropout, Dropout, GaussianBlur, Identity, JpegMask, NoiseLayer, Quantization, Resize};
use crate::error::{Result, WatermarkError};

#[derive(Debug, Clone, PartialEq)]
pub enum NoiseArg {
	Number(f32),
	Tuple(Vec<f32>),
}

impl fmt::Display for NoiseArg {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			NoiseArg::Number(value) => write!(f, "{}", value),
			NoiseArg::Tuple(values) => {
				let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
				write!(f, "({})", values.join(","))
			}
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoiseToken {
	pub name: String,
	pub args: Vec<NoiseArg>,
}

type LayerConstructor = fn(&[NoiseArg]) -> Result<Box<dyn NoiseLayer>>;

lazy_static::lazy_static! {
	static ref REGISTRY: IndexMap<&'static str, LayerConstructor> = {
		let mut registry: IndexMap<&'static str, LayerConstructor> = IndexMap::new();
		registry.insert("identity", Identity::from_args);
		registry.insert("crop", Crop::from_args);
		registry.insert("cropout", Cropout::from_args);
		registry.insert("dropout", Dropout::from_args);
		registry.insert("resize", Resize::from_args);
		registry.insert("jpeg", JpegMask::from_args);
		registry.insert("blur", GaussianBlur::from_args);
		registry.insert("quantization", Quantization::from_args);
		registry
	};
}

/// Names accepted by the parser, in registration order.
pub fn registered_layers() -> Vec<&'static str> {
	REGISTRY.keys().copied().collect()
}

pub fn build_layer(token: &NoiseToken) -> Result<Box<dyn NoiseLayer>> {
	let constructor = REGISTRY.get(token.name.as_str()).ok_or_else(|| {
		WatermarkError::Configuration(format!(
			"unknown noise layer '{}', expected one of [{}]",
			token.name,
			registered_layers().join(", ")
		))
	})?;
	constructor(&token.args)
}

/// Splits a specification into layer tokens. Whitespace between tokens is ignored; an empty or blank
/// string yields no tokens.
pub fn tokenize(spec: &str) -> Result<Vec<NoiseToken>> {
	Parser::new(spec).parse_pipeline()
}

struct Parser<'a> {
	source: &'a str,
	chars: Peekable<CharIndices<'a>>,
}

impl<'a> Parser<'a> {
	fn new(source: &'a str) -> Self {
		Self {
			source,
			chars: source.char_indices().peekable(),
		}
	}

	fn error(&self, message: impl fmt::Display) -> WatermarkError {
		WatermarkError::Parse(format!("{} in noise specification '{}'", message, self.source))
	}

	fn skip_whitespace(&mut self) {
		while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
			self.chars.next();
		}
	}

	fn peek(&mut self) -> Option<char> {
		self.chars.peek().map(|&(_, c)| c)
	}

	fn position(&mut self) -> usize {
		self.chars.peek().map_or(self.source.len(), |&(i, _)| i)
	}

	fn expect(&mut self, expected: char) -> Result<()> {
		self.skip_whitespace();
		let position = self.position();
		match self.chars.next() {
			Some((_, c)) if c == expected => Ok(()),
			Some((_, c)) => Err(self.error(format!("expected '{}' but found '{}' at {}", expected, c, position))),
			None => Err(self.error(format!("expected '{}' but the input ended", expected))),
		}
	}

	fn parse_pipeline(mut self) -> Result<Vec<NoiseToken>> {
		let mut tokens = Vec::new();
		self.skip_whitespace();
		if self.peek().is_none() {
			return Ok(tokens);
		}
		loop {
			tokens.push(self.parse_layer()?);
			self.skip_whitespace();
			let position = self.position();
			match self.chars.next() {
				None => return Ok(tokens),
				Some((_, '+')) => continue,
				Some((_, c)) => return Err(self.error(format!("unexpected '{}' at {}", c, position))),
			}
		}
	}

	fn parse_layer(&mut self) -> Result<NoiseToken> {
		self.skip_whitespace();
		let start = self.position();
		while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '-') {
			self.chars.next();
		}
		let end = self.position();
		let name = &self.source[start..end];
		if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
			return Err(self.error(format!("expected a layer name at {}", start)));
		}
		let name = name.to_lowercase();

		self.skip_whitespace();
		let args = if self.peek() == Some('(') {
			self.chars.next();
			self.parse_args()?
		} else {
			Vec::new()
		};
		Ok(NoiseToken { name, args })
	}

	fn parse_args(&mut self) -> Result<Vec<NoiseArg>> {
		let mut args = Vec::new();
		self.skip_whitespace();
		if self.peek() == Some(')') {
			self.chars.next();
			return Ok(args);
		}
		loop {
			args.push(self.parse_arg()?);
			self.skip_whitespace();
			let position = self.position();
			match self.chars.next() {
				Some((_, ',')) => continue,
				Some((_, ')')) => return Ok(args),
				Some((_, c)) => return Err(self.error(format!("unexpected '{}' at {}", c, position))),
				None => return Err(self.error("unclosed argument list")),
			}
		}
	}

	fn parse_arg(&mut self) -> Result<NoiseArg> {
		self.skip_whitespace();
		if self.peek() != Some('(') {
			return self.parse_number().map(NoiseArg::Number);
		}
		self.chars.next();
		let mut values = vec![self.parse_number()?];
		loop {
			self.skip_whitespace();
			if self.peek() == Some(')') {
				self.chars.next();
				return Ok(NoiseArg::Tuple(values));
			}
			self.expect(',')?;
			values.push(self.parse_number()?);
		}
	}

	fn parse_number(&mut self) -> Result<f32> {
		self.skip_whitespace();
		let start = self.position();
		while matches!(self.peek(), Some(c) if c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')) {
			self.chars.next();
		}
		let end = self.position();
		let text = &self.source[start..end];
		if text.is_empty() {
			return Err(self.error(format!("expected a number at {}", start)));
		}
		text.parse::<f32>()
			.map_err(|_| self.error(format!("'{}' is not a number", text)))
	}
}

/// Rejects any argument for layers that take none.
pub(crate) fn no_args(name: &str, args: &[NoiseArg]) -> Result<()> {
	if args.is_empty() {
		Ok(())
	} else {
		Err(WatermarkError::Parse(format!("{} takes no arguments, got {}", name, args.len())))
	}
}

/// A single `min,max` range, written either as two numbers or as one pair.
pub(crate) fn range_arg(name: &str, args: &[NoiseArg]) -> Result<(f32, f32)> {
	match args {
		[NoiseArg::Number(min), NoiseArg::Number(max)] => Ok((*min, *max)),
		[NoiseArg::Tuple(pair)] if pair.len() == 2 => Ok((pair[0], pair[1])),
		_ => Err(WatermarkError::Parse(format!(
			"{} expects a range 'min,max', got {} argument(s)",
			name,
			args.len()
		))),
	}
}

/// Height and width ratio ranges: `min,max` applies to both, `(hmin,hmax),(wmin,wmax)` sets each.
pub(crate) fn ratio_ranges_arg(name: &str, args: &[NoiseArg]) -> Result<((f32, f32), (f32, f32))> {
	let ranges = match args {
		[NoiseArg::Tuple(height), NoiseArg::Tuple(width)] if height.len() == 2 && width.len() == 2 => {
			((height[0], height[1]), (width[0], width[1]))
		}
		_ => {
			let range = range_arg(name, args)?;
			(range, range)
		}
	};
	check_unit_range(name, ranges.0)?;
	check_unit_range(name, ranges.1)?;
	Ok(ranges)
}

/// `0 <= min <= max <= 1`.
pub(crate) fn check_unit_range(name: &str, (min, max): (f32, f32)) -> Result<()> {
	if !(0.0..=1.0).contains(&min) || !(0.0..=1.0).contains(&max) || min > max {
		return Err(WatermarkError::Configuration(format!(
			"{} range ({}, {}) must satisfy 0 <= min <= max <= 1",
			name, min, max
		)));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tokenizes_names_numbers_and_tuples() {
		let tokens = tokenize(" cropout((0.1, 0.2),(0.3,0.4)) + resize(0.5,1)+jpeg ").unwrap();
		assert_eq!(tokens.len(), 3);
		assert_eq!(tokens[0].name, "cropout");
		assert_eq!(
			tokens[0].args,
			vec![NoiseArg::Tuple(vec![0.1, 0.2]), NoiseArg::Tuple(vec![0.3, 0.4])]
		);
		assert_eq!(tokens[1].args, vec![NoiseArg::Number(0.5), NoiseArg::Number(1.0)]);
		assert!(tokens[2].args.is_empty());
	}

	#[test]
	fn blank_spec_has_no_tokens() {
		assert!(tokenize("").unwrap().is_empty());
		assert!(tokenize("   ").unwrap().is_empty());
	}

	#[test]
	fn malformed_specs_are_parse_errors() {
		for spec in &["crop(0.1,", "crop(0.1 0.2)", "+crop(0.1,0.2)", "crop(0.1,0.2)+", "crop(abc)", "crop)("] {
			assert!(
				matches!(tokenize(spec), Err(WatermarkError::Parse(_))),
				"'{}' should not parse",
				spec
			);
		}
	}

	#[test]
	fn scientific_notation_is_accepted_inside_arguments() {
		let tokens = tokenize("blur(1e-1,2.5E+0)").unwrap();
		assert_eq!(tokens[0].args, vec![NoiseArg::Number(0.1), NoiseArg::Number(2.5)]);
	}

	#[test]
	fn unknown_layer_is_a_configuration_error() {
		let token = NoiseToken {
			name: "gaussian".into(),
			args: vec![],
		};
		assert!(matches!(build_layer(&token), Err(WatermarkError::Configuration(_))));
	}

	#[test]
	fn ratio_ranges_validate_bounds() {
		let args = [NoiseArg::Number(0.6), NoiseArg::Number(0.2)];
		assert!(matches!(
			ratio_ranges_arg("crop", &args),
			Err(WatermarkError::Configuration(_))
		));
		let args = [NoiseArg::Number(0.2)];
		assert!(matches!(ratio_ranges_arg("crop", &args), Err(WatermarkError::Parse(_))));
	}
}
