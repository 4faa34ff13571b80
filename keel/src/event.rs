//! Capability and LED bitmasks, notification state enums, and the seat
//! notification surface devices deliver into.

use std::fmt;

use crate::fixed::Fixed;

/// Stable registry-assigned device identifier. Seats reference devices by id
/// rather than holding pointers back into the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Capability set of a device, fixed at probe time and never mutated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Caps(u32);

impl Caps {
	pub const KEYBOARD: Caps = Caps(1 << 0);
	pub const BUTTON: Caps = Caps(1 << 1);
	pub const MOTION_ABS: Caps = Caps(1 << 2);
	pub const MOTION_REL: Caps = Caps(1 << 3);
	pub const TOUCH: Caps = Caps(1 << 4);
	pub const LED: Caps = Caps(1 << 5);

	pub const fn empty() -> Caps {
		Caps(0)
	}

	pub const fn is_empty(self) -> bool {
		self.0 == 0
	}

	pub const fn contains(self, other: Caps) -> bool {
		self.0 & other.0 == other.0
	}

	pub fn insert(&mut self, other: Caps) {
		self.0 |= other.0;
	}
}

const CAP_NAMES: [(Caps, &str); 6] = [
	(Caps::KEYBOARD, "keyboard"),
	(Caps::BUTTON, "button"),
	(Caps::MOTION_ABS, "motion-abs"),
	(Caps::MOTION_REL, "motion-rel"),
	(Caps::TOUCH, "touch"),
	(Caps::LED, "led"),
];

impl fmt::Display for Caps {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.is_empty() {
			return write!(f, "none");
		}
		let mut first = true;
		for (cap, name) in CAP_NAMES {
			if self.contains(cap) {
				if !first {
					write!(f, "|")?;
				}
				write!(f, "{name}")?;
				first = false;
			}
		}
		Ok(())
	}
}

/// Logical keyboard LED states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Leds(u32);

impl Leds {
	pub const NUM_LOCK: Leds = Leds(1 << 0);
	pub const CAPS_LOCK: Leds = Leds(1 << 1);
	pub const SCROLL_LOCK: Leds = Leds(1 << 2);

	pub const fn empty() -> Leds {
		Leds(0)
	}

	pub const fn contains(self, other: Leds) -> bool {
		self.0 & other.0 == other.0
	}

	pub fn insert(&mut self, other: Leds) {
		self.0 |= other.0;
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ButtonState {
	Pressed,
	Released,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyState {
	Pressed,
	Released,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TouchState {
	Down,
	Up,
	Move,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollAxis {
	Vertical,
	Horizontal,
}

/// Notification callbacks a seat owner registers. Every method has an empty
/// default so consumers implement only what they care about; times are in
/// milliseconds, coordinates in 24.8 fixed point.
#[allow(unused_variables)]
pub trait SeatNotify {
	fn motion(&mut self, device: DeviceId, time: u32, dx: Fixed, dy: Fixed) {}

	fn motion_absolute(&mut self, device: DeviceId, time: u32, x: Fixed, y: Fixed) {}

	fn button(&mut self, device: DeviceId, time: u32, button: u16, state: ButtonState) {}

	fn axis(&mut self, device: DeviceId, time: u32, axis: ScrollAxis, value: Fixed) {}

	fn key(&mut self, device: DeviceId, time: u32, key: u16, state: KeyState) {}

	fn touch(&mut self, device: DeviceId, time: u32, slot: i32, x: Fixed, y: Fixed, state: TouchState) {}

	fn modifiers(&mut self, device: DeviceId, serial: u32) {}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn caps_display_lists_set_bits() {
		let mut caps = Caps::empty();
		assert_eq!(caps.to_string(), "none");
		caps.insert(Caps::KEYBOARD);
		caps.insert(Caps::LED);
		assert_eq!(caps.to_string(), "keyboard|led");
	}

	#[test]
	fn caps_contains_requires_all_bits() {
		let mut caps = Caps::empty();
		caps.insert(Caps::BUTTON);
		caps.insert(Caps::MOTION_REL);
		assert!(caps.contains(Caps::BUTTON));
		let mut both = Caps::BUTTON;
		both.insert(Caps::TOUCH);
		assert!(!caps.contains(both));
	}
}
