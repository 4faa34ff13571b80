//! 24.8 fixed-point coordinates. Motion deltas accumulate across a raw event
//! burst before being flushed as one notification; a fixed fraction avoids
//! the rounding drift a float accumulator would pick up.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fixed(i32);

impl Fixed {
	pub const ZERO: Fixed = Fixed(0);

	pub const fn from_int(value: i32) -> Fixed {
		Fixed(value << 8)
	}

	pub fn from_f64(value: f64) -> Fixed {
		Fixed((value * 256.0) as i32)
	}

	pub const fn to_int(self) -> i32 {
		self.0 >> 8
	}

	pub fn to_f64(self) -> f64 {
		f64::from(self.0) / 256.0
	}

	pub const fn from_raw(raw: i32) -> Fixed {
		Fixed(raw)
	}

	pub const fn raw(self) -> i32 {
		self.0
	}
}

impl Add for Fixed {
	type Output = Fixed;

	fn add(self, rhs: Fixed) -> Fixed {
		Fixed(self.0 + rhs.0)
	}
}

impl AddAssign for Fixed {
	fn add_assign(&mut self, rhs: Fixed) {
		self.0 += rhs.0;
	}
}

impl Sub for Fixed {
	type Output = Fixed;

	fn sub(self, rhs: Fixed) -> Fixed {
		Fixed(self.0 - rhs.0)
	}
}

impl Neg for Fixed {
	type Output = Fixed;

	fn neg(self) -> Fixed {
		Fixed(-self.0)
	}
}

impl fmt::Display for Fixed {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:.2}", self.to_f64())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn int_round_trip() {
		assert_eq!(Fixed::from_int(7).to_int(), 7);
		assert_eq!(Fixed::from_int(-3).to_int(), -3);
		assert_eq!(Fixed::ZERO.to_int(), 0);
	}

	#[test]
	fn accumulation_has_no_drift() {
		let mut acc = Fixed::ZERO;
		for _ in 0..1000 {
			acc += Fixed::from_f64(0.25);
		}
		assert_eq!(acc.to_f64(), 250.0);
	}

	#[test]
	fn negation_mirrors_raw_value() {
		assert_eq!(-Fixed::from_int(5), Fixed::from_int(-5));
		assert_eq!(Fixed::from_int(5) - Fixed::from_int(2), Fixed::from_int(3));
	}
}
