//! Capability probing. The raw bit-vectors and axis ranges are gathered once
//! at discovery; classification over them is pure and deterministic, so a
//! given device always probes to the same capability set.

use thiserror::Error;

use crate::codes::{self, bit_vector_len, test_bit};
use crate::event::Caps;

/// Declared `[min, max]` range of one absolute axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AxisRange {
	pub minimum: i32,
	pub maximum: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AxisRanges {
	pub x: AxisRange,
	pub y: AxisRange,
}

/// Which per-device-class dispatch handles the event stream. The touchpad
/// variant is plugged in externally; everything else takes the fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceClass {
	Fallback,
	Touchpad,
}

/// Raw capability bit-vectors read from a device, plus the axis ranges for
/// the axes whose bits are set. Vectors are byte arrays exactly as EVIOCGBIT
/// fills them.
#[derive(Clone, Debug)]
pub struct DeviceBits {
	pub ev: [u8; bit_vector_len(codes::EV_MAX)],
	pub abs: [u8; bit_vector_len(codes::ABS_MAX)],
	pub rel: [u8; bit_vector_len(codes::REL_MAX)],
	pub key: [u8; bit_vector_len(codes::KEY_MAX)],
	pub led: [u8; bit_vector_len(codes::LED_MAX)],
	pub abs_x: Option<AxisRange>,
	pub abs_y: Option<AxisRange>,
	pub mt_x: Option<AxisRange>,
	pub mt_y: Option<AxisRange>,
}

impl Default for DeviceBits {
	fn default() -> Self {
		Self {
			ev: [0; bit_vector_len(codes::EV_MAX)],
			abs: [0; bit_vector_len(codes::ABS_MAX)],
			rel: [0; bit_vector_len(codes::REL_MAX)],
			key: [0; bit_vector_len(codes::KEY_MAX)],
			led: [0; bit_vector_len(codes::LED_MAX)],
			abs_x: None,
			abs_y: None,
			mt_x: None,
			mt_y: None,
		}
	}
}

/// Probe result, immutable once stored on the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Probe {
	pub caps: Caps,
	pub ranges: Option<AxisRanges>,
	pub multitouch: bool,
	pub class: DeviceClass,
}

/// The device carries none of the capabilities this layer understands.
/// Catches accelerometer-like devices; the device is simply not created.
#[derive(Debug, Error)]
#[error("device reports no recognized input capabilities")]
pub struct UnsupportedDevice;

pub fn probe(bits: &DeviceBits) -> Result<Probe, UnsupportedDevice> {
	let mut caps = Caps::empty();
	let mut ranges = AxisRanges::default();
	let mut multitouch = false;
	let mut class = DeviceClass::Fallback;
	let mut has_abs = false;
	let mut has_key = false;

	if test_bit(&bits.ev, codes::EV_ABS) {
		has_abs = true;
		if test_bit(&bits.abs, codes::ABS_X) {
			ranges.x = bits.abs_x.unwrap_or_default();
			caps.insert(Caps::MOTION_ABS);
		}
		if test_bit(&bits.abs, codes::ABS_Y) {
			ranges.y = bits.abs_y.unwrap_or_default();
			caps.insert(Caps::MOTION_ABS);
		}
		if test_bit(&bits.abs, codes::ABS_MT_SLOT) {
			// Multitouch position ranges take precedence over ABS_X/Y.
			ranges.x = bits.mt_x.unwrap_or_default();
			ranges.y = bits.mt_y.unwrap_or_default();
			multitouch = true;
			caps.insert(Caps::TOUCH);
		}
	}

	if test_bit(&bits.ev, codes::EV_REL)
		&& (test_bit(&bits.rel, codes::REL_X) || test_bit(&bits.rel, codes::REL_Y))
	{
		caps.insert(Caps::MOTION_REL);
	}

	if test_bit(&bits.ev, codes::EV_KEY) {
		has_key = true;
		if test_bit(&bits.key, codes::BTN_TOOL_FINGER)
			&& !test_bit(&bits.key, codes::BTN_TOOL_PEN)
			&& caps.contains(Caps::MOTION_ABS)
		{
			class = DeviceClass::Touchpad;
		}
		for code in codes::KEY_ESC..codes::KEY_MAX {
			if (codes::BTN_MISC..codes::KEY_OK).contains(&code) {
				continue;
			}
			if test_bit(&bits.key, code) {
				caps.insert(Caps::KEYBOARD);
				break;
			}
		}
		for code in codes::BTN_MISC..codes::KEY_OK {
			if test_bit(&bits.key, code) {
				caps.insert(Caps::BUTTON);
				break;
			}
		}
	}

	if test_bit(&bits.ev, codes::EV_LED) {
		caps.insert(Caps::LED);
	}

	if !has_abs && !has_key && !multitouch {
		return Err(UnsupportedDevice);
	}

	let ranges = (caps.contains(Caps::MOTION_ABS) || multitouch).then_some(ranges);
	Ok(Probe { caps, ranges, multitouch, class })
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::codes::set_bit;

	fn keyboard_bits() -> DeviceBits {
		let mut bits = DeviceBits::default();
		set_bit(&mut bits.ev, codes::EV_KEY);
		set_bit(&mut bits.key, codes::KEY_ESC);
		set_bit(&mut bits.key, 0x1e); // KEY_A
		bits
	}

	#[test]
	fn all_zero_vectors_are_rejected() {
		assert!(probe(&DeviceBits::default()).is_err());
	}

	#[test]
	fn led_alone_is_still_rejected() {
		let mut bits = DeviceBits::default();
		set_bit(&mut bits.ev, codes::EV_LED);
		set_bit(&mut bits.led, codes::LED_NUML);
		assert!(probe(&bits).is_err());
	}

	#[test]
	fn keyboard_range_sets_keyboard_only() {
		let probed = probe(&keyboard_bits()).unwrap();
		assert_eq!(probed.caps, {
			let mut c = Caps::empty();
			c.insert(Caps::KEYBOARD);
			c
		});
		assert_eq!(probed.ranges, None);
		assert!(!probed.multitouch);
		assert_eq!(probed.class, DeviceClass::Fallback);
	}

	#[test]
	fn button_sub_range_does_not_count_as_keyboard() {
		let mut bits = DeviceBits::default();
		set_bit(&mut bits.ev, codes::EV_KEY);
		set_bit(&mut bits.ev, codes::EV_REL);
		set_bit(&mut bits.rel, codes::REL_X);
		set_bit(&mut bits.key, codes::BTN_LEFT);
		let probed = probe(&bits).unwrap();
		assert!(probed.caps.contains(Caps::BUTTON));
		assert!(probed.caps.contains(Caps::MOTION_REL));
		assert!(!probed.caps.contains(Caps::KEYBOARD));
	}

	#[test]
	fn absolute_axes_record_declared_ranges() {
		let mut bits = DeviceBits::default();
		set_bit(&mut bits.ev, codes::EV_ABS);
		set_bit(&mut bits.abs, codes::ABS_X);
		set_bit(&mut bits.abs, codes::ABS_Y);
		bits.abs_x = Some(AxisRange { minimum: 0, maximum: 4095 });
		bits.abs_y = Some(AxisRange { minimum: 0, maximum: 2047 });
		let probed = probe(&bits).unwrap();
		assert!(probed.caps.contains(Caps::MOTION_ABS));
		let ranges = probed.ranges.unwrap();
		assert_eq!(ranges.x.maximum, 4095);
		assert_eq!(ranges.y.maximum, 2047);
	}

	#[test]
	fn multitouch_slot_bit_selects_mt_ranges() {
		let mut bits = DeviceBits::default();
		set_bit(&mut bits.ev, codes::EV_ABS);
		set_bit(&mut bits.abs, codes::ABS_X);
		set_bit(&mut bits.abs, codes::ABS_Y);
		set_bit(&mut bits.abs, codes::ABS_MT_SLOT);
		bits.abs_x = Some(AxisRange { minimum: 0, maximum: 100 });
		bits.abs_y = Some(AxisRange { minimum: 0, maximum: 100 });
		bits.mt_x = Some(AxisRange { minimum: 0, maximum: 799 });
		bits.mt_y = Some(AxisRange { minimum: 0, maximum: 479 });
		let probed = probe(&bits).unwrap();
		assert!(probed.multitouch);
		assert!(probed.caps.contains(Caps::TOUCH));
		let ranges = probed.ranges.unwrap();
		assert_eq!(ranges.x.maximum, 799);
		assert_eq!(ranges.y.maximum, 479);
	}

	#[test]
	fn finger_tool_without_pen_selects_touchpad_class() {
		let mut bits = DeviceBits::default();
		set_bit(&mut bits.ev, codes::EV_ABS);
		set_bit(&mut bits.ev, codes::EV_KEY);
		set_bit(&mut bits.abs, codes::ABS_X);
		set_bit(&mut bits.abs, codes::ABS_Y);
		set_bit(&mut bits.key, codes::BTN_TOOL_FINGER);
		set_bit(&mut bits.key, codes::BTN_TOUCH);
		let probed = probe(&bits).unwrap();
		assert_eq!(probed.class, DeviceClass::Touchpad);

		// A pen tool turns the same device back into a tablet (fallback).
		set_bit(&mut bits.key, codes::BTN_TOOL_PEN);
		let probed = probe(&bits).unwrap();
		assert_eq!(probed.class, DeviceClass::Fallback);
	}

	#[test]
	fn probing_is_deterministic() {
		let bits = keyboard_bits();
		assert_eq!(probe(&bits).unwrap(), probe(&bits).unwrap());
	}
}
