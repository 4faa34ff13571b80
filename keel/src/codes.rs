//! Kernel constant tables: the subset of `input-event-codes.h`, `vt.h` and
//! `kd.h` this crate consumes, plus the raw event record and the byte-array
//! bit-vector helpers used by capability probing.

use std::os::raw::c_ulong;

// Event types
pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;
pub const EV_ABS: u16 = 0x03;
pub const EV_LED: u16 = 0x11;
pub const EV_MAX: u16 = 0x1f;

// Relative axes
pub const REL_X: u16 = 0x00;
pub const REL_Y: u16 = 0x01;
pub const REL_HWHEEL: u16 = 0x06;
pub const REL_WHEEL: u16 = 0x08;
pub const REL_MAX: u16 = 0x0f;

// Absolute axes
pub const ABS_X: u16 = 0x00;
pub const ABS_Y: u16 = 0x01;
pub const ABS_MT_SLOT: u16 = 0x2f;
pub const ABS_MT_POSITION_X: u16 = 0x35;
pub const ABS_MT_POSITION_Y: u16 = 0x36;
pub const ABS_MT_TRACKING_ID: u16 = 0x39;
pub const ABS_MAX: u16 = 0x3f;

// Keys and buttons. KEY_ESC..KEY_MAX is the keyboard range, BTN_MISC..KEY_OK
// the button/mouse sub-range carved out of it.
pub const KEY_ESC: u16 = 0x01;
pub const BTN_MISC: u16 = 0x100;
pub const BTN_LEFT: u16 = 0x110;
pub const BTN_RIGHT: u16 = 0x111;
pub const BTN_MIDDLE: u16 = 0x112;
pub const BTN_SIDE: u16 = 0x113;
pub const BTN_EXTRA: u16 = 0x114;
pub const BTN_FORWARD: u16 = 0x115;
pub const BTN_BACK: u16 = 0x116;
pub const BTN_TASK: u16 = 0x117;
pub const BTN_TOOL_PEN: u16 = 0x140;
pub const BTN_TOOL_FINGER: u16 = 0x145;
pub const BTN_TOUCH: u16 = 0x14a;
pub const KEY_OK: u16 = 0x160;
pub const KEY_MAX: u16 = 0x2ff;

// LEDs
pub const LED_NUML: u16 = 0x00;
pub const LED_CAPSL: u16 = 0x01;
pub const LED_SCROLLL: u16 = 0x02;
pub const LED_MAX: u16 = 0x0f;

// Console ioctl requests (vt.h / kd.h). Fixed UAPI values.
pub const VT_OPENQRY: c_ulong = 0x5600;
pub const VT_SETMODE: c_ulong = 0x5602;
pub const VT_GETSTATE: c_ulong = 0x5603;
pub const VT_RELDISP: c_ulong = 0x5605;
pub const VT_ACTIVATE: c_ulong = 0x5606;
pub const VT_WAITACTIVE: c_ulong = 0x5607;
pub const KDSETMODE: c_ulong = 0x4b3a;
pub const KDGKBMODE: c_ulong = 0x4b44;
pub const KDSKBMODE: c_ulong = 0x4b45;

// Console ioctl arguments
pub const VT_AUTO: i32 = 0x00;
pub const VT_PROCESS: i32 = 0x01;
pub const VT_ACKACQ: i32 = 0x02;
pub const KD_TEXT: i32 = 0x00;
pub const KD_GRAPHICS: i32 = 0x01;
pub const K_RAW: i32 = 0x00;
/// Disables kernel keyboard decoding entirely. Introduced in 2.6.38; older
/// kernels reject it and we fall back to [`K_RAW`].
pub const K_OFF: i32 = 0x04;

/// Number of bytes needed for a bit-vector covering codes `0..=max`.
pub const fn bit_vector_len(max: u16) -> usize {
	max as usize / 8 + 1
}

pub fn test_bit(bits: &[u8], code: u16) -> bool {
	let code = code as usize;
	bits.get(code / 8).is_some_and(|byte| byte & (1 << (code % 8)) != 0)
}

pub fn set_bit(bits: &mut [u8], code: u16) {
	let code = code as usize;
	if let Some(byte) = bits.get_mut(code / 8) {
		*byte |= 1 << (code % 8);
	}
}

/// The kernel's raw input event record, parsed exactly as delivered:
/// timestamp, type, code, value.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct InputEvent {
	pub time: libc::timeval,
	pub kind: u16,
	pub code: u16,
	pub value: i32,
}

impl InputEvent {
	pub const ZERO: InputEvent = InputEvent {
		time: libc::timeval { tv_sec: 0, tv_usec: 0 },
		kind: 0,
		code: 0,
		value: 0,
	};

	pub fn new(kind: u16, code: u16, value: i32) -> Self {
		Self { kind, code, value, ..Self::ZERO }
	}

	/// Event timestamp in milliseconds, the unit all notifications carry.
	pub fn millis(&self) -> u32 {
		(self.time.tv_sec * 1000 + self.time.tv_usec / 1000) as u32
	}
}
