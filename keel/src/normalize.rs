//! Raw event normalization and motion/touch batching.
//!
//! Raw events are consumed one at a time; motion-class events accumulate in
//! the pending mask and are flushed as one coalesced notification per logical
//! frame, bounded by the kernel's synchronization marker. Button, key and
//! single-touch-release events bypass batching and notify immediately.

use tracing::trace;

use crate::codes::{self, InputEvent};
use crate::event::{ButtonState, DeviceId, KeyState, ScrollAxis, SeatNotify, TouchState};
use crate::fixed::Fixed;

/// Upper bound on tracked multitouch contacts (protocol slot ids).
pub const MAX_SLOTS: usize = 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Pending(u32);

impl Pending {
	const RELATIVE: Pending = Pending(1 << 0);
	const ABSOLUTE: Pending = Pending(1 << 1);
	const MT_DOWN: Pending = Pending(1 << 2);
	const MT_MOTION: Pending = Pending(1 << 3);
	const MT_UP: Pending = Pending(1 << 4);
	const SYN: Pending = Pending(1 << 5);

	fn set(&mut self, other: Pending) {
		self.0 |= other.0;
	}

	fn clear(&mut self, other: Pending) {
		self.0 &= !other.0;
	}

	fn contains(self, other: Pending) -> bool {
		self.0 & other.0 == other.0
	}

	#[cfg(test)]
	fn is_empty(self) -> bool {
		self.0 == 0
	}
}

/// Optional 2x3 affine transform applied to absolute coordinates before
/// emission: `x' = a*x + b*y + c`, `y' = d*x + e*y + f`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration(pub [f32; 6]);

#[derive(Clone, Copy, Debug)]
struct MtState {
	x: [i32; MAX_SLOTS],
	y: [i32; MAX_SLOTS],
	slot: usize,
}

/// Per-device normalization state carried across bursts: the pending-event
/// mask, the multitouch slot tracker, and the motion accumulators.
#[derive(Debug)]
pub struct Normalizer {
	pending: Pending,
	mt: MtState,
	rel_dx: Fixed,
	rel_dy: Fixed,
	abs_x: i32,
	abs_y: i32,
	calibration: Option<Calibration>,
	multitouch: bool,
}

impl Normalizer {
	pub fn new(multitouch: bool) -> Self {
		Self {
			pending: Pending::default(),
			mt: MtState { x: [0; MAX_SLOTS], y: [0; MAX_SLOTS], slot: 0 },
			rel_dx: Fixed::ZERO,
			rel_dy: Fixed::ZERO,
			abs_x: 0,
			abs_y: 0,
			calibration: None,
			multitouch,
		}
	}

	pub fn set_calibration(&mut self, calibration: Calibration) {
		self.calibration = Some(calibration);
	}

	pub fn is_multitouch(&self) -> bool {
		self.multitouch
	}

	/// Runs one burst of raw events through the dispatch. Flushes pending
	/// motion whenever a non-motion event interrupts the burst and once more
	/// at the end, so consecutive motion events coalesce into a single
	/// notification per frame.
	pub fn process_events(
		&mut self,
		dispatch: &mut dyn EvdevDispatch,
		notify: &mut dyn SeatNotify,
		device: DeviceId,
		events: &[InputEvent],
	) {
		self.pending = Pending::default();
		let mut time = 0;
		for event in events {
			time = event.millis();
			if !is_motion_event(event) {
				self.flush(notify, device, time);
			}
			dispatch.process(self, notify, device, event, time);
		}
		self.flush(notify, device, time);
	}

	/// Emits every still-pending category at most once and drains the mask.
	/// No-op until a synchronization marker has set the sync-pending bit.
	pub fn flush(&mut self, notify: &mut dyn SeatNotify, device: DeviceId, time: u32) {
		if !self.pending.contains(Pending::SYN) {
			return;
		}
		self.pending.clear(Pending::SYN);

		if self.pending.contains(Pending::RELATIVE) {
			notify.motion(device, time, self.rel_dx, self.rel_dy);
			self.pending.clear(Pending::RELATIVE);
			self.rel_dx = Fixed::ZERO;
			self.rel_dy = Fixed::ZERO;
		}
		let slot = self.mt.slot;
		let (mt_x, mt_y) = (Fixed::from_int(self.mt.x[slot]), Fixed::from_int(self.mt.y[slot]));
		if self.pending.contains(Pending::MT_DOWN) {
			notify.touch(device, time, slot as i32, mt_x, mt_y, TouchState::Down);
			self.pending.clear(Pending::MT_DOWN);
			self.pending.clear(Pending::MT_MOTION);
		}
		if self.pending.contains(Pending::MT_MOTION) {
			notify.touch(device, time, slot as i32, mt_x, mt_y, TouchState::Move);
			self.pending.clear(Pending::MT_MOTION);
		}
		if self.pending.contains(Pending::MT_UP) {
			notify.touch(device, time, slot as i32, mt_x, mt_y, TouchState::Up);
			self.pending.clear(Pending::MT_UP);
		}
		if self.pending.contains(Pending::ABSOLUTE) {
			self.transform_absolute();
			notify.motion_absolute(
				device,
				time,
				Fixed::from_int(self.abs_x),
				Fixed::from_int(self.abs_y),
			);
			self.pending.clear(Pending::ABSOLUTE);
		}
	}

	fn process_key(&mut self, notify: &mut dyn SeatNotify, device: DeviceId, event: &InputEvent, time: u32) {
		// Kernel autorepeat; consumers synthesize their own repeats.
		if event.value == 2 {
			return;
		}
		match event.code {
			codes::BTN_LEFT
			| codes::BTN_RIGHT
			| codes::BTN_MIDDLE
			| codes::BTN_SIDE
			| codes::BTN_EXTRA
			| codes::BTN_FORWARD
			| codes::BTN_BACK
			| codes::BTN_TASK => {
				let state = if event.value != 0 { ButtonState::Pressed } else { ButtonState::Released };
				notify.button(device, time, event.code, state);
			}
			codes::BTN_TOUCH => {
				// Single-touch protocol fallback: devices without slots
				// signal contact end through BTN_TOUCH alone.
				if event.value == 0 && !self.multitouch {
					notify.touch(device, time, 0, Fixed::ZERO, Fixed::ZERO, TouchState::Up);
				}
			}
			_ => {
				let state = if event.value != 0 { KeyState::Pressed } else { KeyState::Released };
				notify.key(device, time, event.code, state);
			}
		}
	}

	fn process_relative(&mut self, notify: &mut dyn SeatNotify, device: DeviceId, event: &InputEvent, time: u32) {
		match event.code {
			codes::REL_X => {
				self.rel_dx += Fixed::from_int(event.value);
				self.pending.set(Pending::RELATIVE);
			}
			codes::REL_Y => {
				self.rel_dy += Fixed::from_int(event.value);
				self.pending.set(Pending::RELATIVE);
			}
			// Legacy single-detent wheels: only literal +-1 count, anything
			// else is dropped on the floor.
			codes::REL_WHEEL => match event.value {
				-1 | 1 => notify.axis(
					device,
					time,
					ScrollAxis::Vertical,
					Fixed::from_int(-event.value),
				),
				_ => {}
			},
			codes::REL_HWHEEL => match event.value {
				-1 | 1 => notify.axis(
					device,
					time,
					ScrollAxis::Horizontal,
					Fixed::from_int(event.value),
				),
				_ => {}
			},
			_ => {}
		}
	}

	fn process_absolute_motion(&mut self, event: &InputEvent) {
		match event.code {
			codes::ABS_X => {
				self.abs_x = event.value;
				self.pending.set(Pending::ABSOLUTE);
			}
			codes::ABS_Y => {
				self.abs_y = event.value;
				self.pending.set(Pending::ABSOLUTE);
			}
			_ => {}
		}
	}

	fn process_touch(&mut self, event: &InputEvent) {
		match event.code {
			codes::ABS_MT_SLOT => {
				if (0..MAX_SLOTS as i32).contains(&event.value) {
					self.mt.slot = event.value as usize;
				} else {
					trace!(slot = event.value, "multitouch slot out of range, ignored");
				}
			}
			codes::ABS_MT_TRACKING_ID => {
				if event.value >= 0 {
					self.pending.set(Pending::MT_DOWN);
				} else {
					self.pending.set(Pending::MT_UP);
				}
			}
			codes::ABS_MT_POSITION_X => {
				self.mt.x[self.mt.slot] = event.value;
				self.pending.set(Pending::MT_MOTION);
			}
			codes::ABS_MT_POSITION_Y => {
				self.mt.y[self.mt.slot] = event.value;
				self.pending.set(Pending::MT_MOTION);
			}
			_ => {}
		}
	}

	fn process_absolute(&mut self, event: &InputEvent) {
		if self.multitouch {
			self.process_touch(event);
		} else {
			self.process_absolute_motion(event);
		}
	}

	fn transform_absolute(&mut self) {
		let Some(Calibration(c)) = self.calibration else {
			return;
		};
		let (x, y) = (self.abs_x as f32, self.abs_y as f32);
		self.abs_x = (x * c[0] + y * c[1] + c[2]) as i32;
		self.abs_y = (x * c[3] + y * c[4] + c[5]) as i32;
	}
}

/// Motion-class events fold into the running burst instead of forcing a
/// flush, so a frame's worth of deltas emits exactly once.
fn is_motion_event(event: &InputEvent) -> bool {
	match event.kind {
		codes::EV_REL => matches!(event.code, codes::REL_X | codes::REL_Y),
		codes::EV_ABS => matches!(
			event.code,
			codes::ABS_X | codes::ABS_Y | codes::ABS_MT_POSITION_X | codes::ABS_MT_POSITION_Y
		),
		_ => false,
	}
}

/// Per-device-class event processing, selected once at creation by the
/// capability probe and immutable thereafter.
pub trait EvdevDispatch {
	fn process(
		&mut self,
		normalizer: &mut Normalizer,
		notify: &mut dyn SeatNotify,
		device: DeviceId,
		event: &InputEvent,
		time: u32,
	);
}

/// Generic dispatch used by every device class without a specialized
/// implementation.
#[derive(Debug, Default)]
pub struct FallbackDispatch;

impl EvdevDispatch for FallbackDispatch {
	fn process(
		&mut self,
		normalizer: &mut Normalizer,
		notify: &mut dyn SeatNotify,
		device: DeviceId,
		event: &InputEvent,
		time: u32,
	) {
		match event.kind {
			codes::EV_REL => normalizer.process_relative(notify, device, event, time),
			codes::EV_ABS => normalizer.process_absolute(event),
			codes::EV_KEY => normalizer.process_key(notify, device, event, time),
			codes::EV_SYN => normalizer.pending.set(Pending::SYN),
			_ => {}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const DEV: DeviceId = DeviceId(1);

	#[derive(Debug, PartialEq)]
	enum Note {
		Motion { dx: Fixed, dy: Fixed },
		MotionAbsolute { x: Fixed, y: Fixed },
		Button { button: u16, state: ButtonState },
		Axis { axis: ScrollAxis, value: Fixed },
		Key { key: u16, state: KeyState },
		Touch { slot: i32, x: Fixed, y: Fixed, state: TouchState },
	}

	#[derive(Default)]
	struct Recorder(Vec<Note>);

	impl SeatNotify for Recorder {
		fn motion(&mut self, _: DeviceId, _: u32, dx: Fixed, dy: Fixed) {
			self.0.push(Note::Motion { dx, dy });
		}

		fn motion_absolute(&mut self, _: DeviceId, _: u32, x: Fixed, y: Fixed) {
			self.0.push(Note::MotionAbsolute { x, y });
		}

		fn button(&mut self, _: DeviceId, _: u32, button: u16, state: ButtonState) {
			self.0.push(Note::Button { button, state });
		}

		fn axis(&mut self, _: DeviceId, _: u32, axis: ScrollAxis, value: Fixed) {
			self.0.push(Note::Axis { axis, value });
		}

		fn key(&mut self, _: DeviceId, _: u32, key: u16, state: KeyState) {
			self.0.push(Note::Key { key, state });
		}

		fn touch(&mut self, _: DeviceId, _: u32, slot: i32, x: Fixed, y: Fixed, state: TouchState) {
			self.0.push(Note::Touch { slot, x, y, state });
		}
	}

	fn ev(kind: u16, code: u16, value: i32) -> InputEvent {
		InputEvent::new(kind, code, value)
	}

	fn syn() -> InputEvent {
		ev(codes::EV_SYN, 0, 0)
	}

	fn run(normalizer: &mut Normalizer, recorder: &mut Recorder, events: &[InputEvent]) {
		let mut dispatch = FallbackDispatch;
		normalizer.process_events(&mut dispatch, recorder, DEV, events);
	}

	#[test]
	fn no_sync_marker_means_no_batched_notifications() {
		let mut norm = Normalizer::new(false);
		let mut rec = Recorder::default();
		run(&mut norm, &mut rec, &[
			ev(codes::EV_REL, codes::REL_X, 3),
			ev(codes::EV_REL, codes::REL_Y, -2),
			ev(codes::EV_ABS, codes::ABS_X, 100),
		]);
		assert!(rec.0.is_empty());
	}

	#[test]
	fn relative_motion_accumulates_and_flushes_once() {
		let mut norm = Normalizer::new(false);
		let mut rec = Recorder::default();
		run(&mut norm, &mut rec, &[
			ev(codes::EV_REL, codes::REL_X, 1),
			ev(codes::EV_REL, codes::REL_X, 2),
			ev(codes::EV_REL, codes::REL_Y, 5),
			syn(),
		]);
		assert_eq!(rec.0, vec![Note::Motion {
			dx: Fixed::from_int(3),
			dy: Fixed::from_int(5),
		}]);
		assert!(norm.pending.is_empty());

		// The accumulator was zeroed; an empty frame emits nothing.
		rec.0.clear();
		run(&mut norm, &mut rec, &[syn()]);
		assert!(rec.0.is_empty());
	}

	#[test]
	fn wheel_fires_only_on_literal_single_detents() {
		let mut norm = Normalizer::new(false);
		let mut rec = Recorder::default();
		run(&mut norm, &mut rec, &[
			ev(codes::EV_REL, codes::REL_WHEEL, 1),
			ev(codes::EV_REL, codes::REL_WHEEL, 2),
			ev(codes::EV_REL, codes::REL_WHEEL, -3),
			ev(codes::EV_REL, codes::REL_WHEEL, 0),
			ev(codes::EV_REL, codes::REL_HWHEEL, -1),
			ev(codes::EV_REL, codes::REL_HWHEEL, 4),
		]);
		// Vertical values are negated, horizontal pass through; no sync
		// marker needed, axis events are immediate.
		assert_eq!(rec.0, vec![
			Note::Axis { axis: ScrollAxis::Vertical, value: Fixed::from_int(-1) },
			Note::Axis { axis: ScrollAxis::Horizontal, value: Fixed::from_int(-1) },
		]);
	}

	#[test]
	fn autorepeat_keys_are_dropped() {
		let mut norm = Normalizer::new(false);
		let mut rec = Recorder::default();
		run(&mut norm, &mut rec, &[
			ev(codes::EV_KEY, 0x1e, 1),
			ev(codes::EV_KEY, 0x1e, 2),
			ev(codes::EV_KEY, 0x1e, 2),
			ev(codes::EV_KEY, 0x1e, 0),
		]);
		assert_eq!(rec.0, vec![
			Note::Key { key: 0x1e, state: KeyState::Pressed },
			Note::Key { key: 0x1e, state: KeyState::Released },
		]);
	}

	#[test]
	fn buttons_notify_immediately() {
		let mut norm = Normalizer::new(false);
		let mut rec = Recorder::default();
		run(&mut norm, &mut rec, &[ev(codes::EV_KEY, codes::BTN_LEFT, 1)]);
		assert_eq!(rec.0, vec![Note::Button {
			button: codes::BTN_LEFT,
			state: ButtonState::Pressed,
		}]);
	}

	#[test]
	fn single_touch_release_bypasses_the_slot_tracker() {
		let mut norm = Normalizer::new(false);
		let mut rec = Recorder::default();
		run(&mut norm, &mut rec, &[ev(codes::EV_KEY, codes::BTN_TOUCH, 0)]);
		assert_eq!(rec.0, vec![Note::Touch {
			slot: 0,
			x: Fixed::ZERO,
			y: Fixed::ZERO,
			state: TouchState::Up,
		}]);

		// On a multitouch device BTN_TOUCH is redundant with tracking ids.
		let mut norm = Normalizer::new(true);
		let mut rec = Recorder::default();
		run(&mut norm, &mut rec, &[ev(codes::EV_KEY, codes::BTN_TOUCH, 0)]);
		assert!(rec.0.is_empty());
	}

	#[test]
	fn multitouch_contact_lifecycle_coalesces_moves() {
		let mut norm = Normalizer::new(true);
		let mut rec = Recorder::default();

		// Frame 1: contact down on slot 2 at (10, 20).
		run(&mut norm, &mut rec, &[
			ev(codes::EV_ABS, codes::ABS_MT_SLOT, 2),
			ev(codes::EV_ABS, codes::ABS_MT_TRACKING_ID, 5),
			ev(codes::EV_ABS, codes::ABS_MT_POSITION_X, 10),
			ev(codes::EV_ABS, codes::ABS_MT_POSITION_Y, 20),
			syn(),
		]);
		// Frame 2: both axis updates land in one frame; the intermediate
		// (12, 20) position is coalesced away.
		run(&mut norm, &mut rec, &[
			ev(codes::EV_ABS, codes::ABS_MT_POSITION_X, 12),
			ev(codes::EV_ABS, codes::ABS_MT_POSITION_Y, 22),
			syn(),
		]);
		// Frame 3: contact lifts.
		run(&mut norm, &mut rec, &[
			ev(codes::EV_ABS, codes::ABS_MT_TRACKING_ID, -1),
			syn(),
		]);

		assert_eq!(rec.0, vec![
			Note::Touch {
				slot: 2,
				x: Fixed::from_int(10),
				y: Fixed::from_int(20),
				state: TouchState::Down,
			},
			Note::Touch {
				slot: 2,
				x: Fixed::from_int(12),
				y: Fixed::from_int(22),
				state: TouchState::Move,
			},
			Note::Touch {
				slot: 2,
				x: Fixed::from_int(12),
				y: Fixed::from_int(22),
				state: TouchState::Up,
			},
		]);
		assert!(norm.pending.is_empty());
	}

	#[test]
	fn down_and_motion_in_one_frame_emit_down_only() {
		let mut norm = Normalizer::new(true);
		let mut rec = Recorder::default();
		run(&mut norm, &mut rec, &[
			ev(codes::EV_ABS, codes::ABS_MT_TRACKING_ID, 7),
			ev(codes::EV_ABS, codes::ABS_MT_POSITION_X, 30),
			ev(codes::EV_ABS, codes::ABS_MT_POSITION_Y, 40),
			syn(),
		]);
		assert_eq!(rec.0, vec![Note::Touch {
			slot: 0,
			x: Fixed::from_int(30),
			y: Fixed::from_int(40),
			state: TouchState::Down,
		}]);
	}

	#[test]
	fn out_of_range_slot_select_is_ignored() {
		let mut norm = Normalizer::new(true);
		let mut rec = Recorder::default();
		run(&mut norm, &mut rec, &[
			ev(codes::EV_ABS, codes::ABS_MT_SLOT, MAX_SLOTS as i32 + 4),
			ev(codes::EV_ABS, codes::ABS_MT_TRACKING_ID, 1),
			ev(codes::EV_ABS, codes::ABS_MT_POSITION_X, 9),
			syn(),
		]);
		assert_eq!(rec.0, vec![Note::Touch {
			slot: 0,
			x: Fixed::from_int(9),
			y: Fixed::ZERO,
			state: TouchState::Down,
		}]);
	}

	#[test]
	fn absolute_motion_applies_calibration_on_flush() {
		let mut norm = Normalizer::new(false);
		norm.set_calibration(Calibration([2.0, 0.0, 1.0, 0.0, 2.0, -1.0]));
		let mut rec = Recorder::default();
		run(&mut norm, &mut rec, &[
			ev(codes::EV_ABS, codes::ABS_X, 100),
			ev(codes::EV_ABS, codes::ABS_Y, 50),
			syn(),
		]);
		assert_eq!(rec.0, vec![Note::MotionAbsolute {
			x: Fixed::from_int(201),
			y: Fixed::from_int(99),
		}]);
	}

	#[test]
	fn non_motion_event_mid_burst_flushes_prior_frame() {
		let mut norm = Normalizer::new(false);
		let mut rec = Recorder::default();
		// The key event after the first marker forces the relative frame
		// out before the key notification of the second frame.
		run(&mut norm, &mut rec, &[
			ev(codes::EV_REL, codes::REL_X, 4),
			syn(),
			ev(codes::EV_KEY, 0x1e, 1),
			syn(),
		]);
		assert_eq!(rec.0, vec![
			Note::Motion { dx: Fixed::from_int(4), dy: Fixed::ZERO },
			Note::Key { key: 0x1e, state: KeyState::Pressed },
		]);
	}
}
