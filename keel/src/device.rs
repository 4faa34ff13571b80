//! Device lifecycle: discovery-time probing over the evdev ioctls, LED state
//! writes, and the read-until-drained event loop body.

use std::any::Any;
use std::fs::OpenOptions;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::{ioctl_read, ioctl_read_buf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::codes::{self, InputEvent, test_bit};
use crate::event::{Caps, DeviceId, Leds, SeatNotify};
use crate::normalize::{Calibration, EvdevDispatch, FallbackDispatch, Normalizer};
use crate::probe::{AxisRange, AxisRanges, DeviceBits, DeviceClass, Probe, probe};

ioctl_read_buf!(eviocgname, b'E', 0x06, u8);
ioctl_read_buf!(eviocgbit_ev, b'E', 0x20, u8);
ioctl_read_buf!(eviocgbit_key, b'E', 0x21, u8);
ioctl_read_buf!(eviocgbit_rel, b'E', 0x22, u8);
ioctl_read_buf!(eviocgbit_abs, b'E', 0x23, u8);
ioctl_read_buf!(eviocgbit_led, b'E', 0x31, u8);
ioctl_read!(eviocgabs_x, b'E', 0x40, libc::input_absinfo);
ioctl_read!(eviocgabs_y, b'E', 0x41, libc::input_absinfo);
ioctl_read!(eviocgabs_mt_x, b'E', 0x75, libc::input_absinfo);
ioctl_read!(eviocgabs_mt_y, b'E', 0x76, libc::input_absinfo);

/// Events read per batch while draining a device fd.
const EVENT_BATCH: usize = 32;

/// Builds the dispatch for touchpad-class devices. The specialized touchpad
/// processing is an external collaborator; without a factory the fallback
/// dispatch handles those devices too.
pub type DispatchFactory = Box<dyn Fn(&Probe) -> Box<dyn EvdevDispatch>>;

#[derive(Debug, Error)]
pub enum DeviceError {
	#[error("failed to open {path}: {source}")]
	Open { path: PathBuf, source: io::Error },
	#[error("failed to query capabilities of {path}: {source}")]
	Query { path: PathBuf, source: Errno },
	#[error("input device {path} ignored: unsupported device type")]
	Unsupported { path: PathBuf },
}

/// Outcome of draining a device fd.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DrainOutcome {
	/// All currently available events were consumed (or the batch was
	/// abandoned on a transient error).
	Drained,
	/// The underlying device is gone; the registry must destroy it.
	Gone,
}

/// One kernel input device: identity, probed capabilities, the event fd once
/// a seat owns it, and the per-device normalization state.
pub struct EvdevDevice {
	id: DeviceId,
	path: PathBuf,
	name: String,
	caps: Caps,
	ranges: Option<AxisRanges>,
	multitouch: bool,
	pub(crate) fd: Option<OwnedFd>,
	pub(crate) seat: Option<String>,
	pub(crate) leds: Leds,
	user_data: Option<Box<dyn Any>>,
	norm: Normalizer,
	dispatch: Box<dyn EvdevDispatch>,
}

impl EvdevDevice {
	/// Opens the device node, probes its capabilities and closes it again;
	/// the event fd is only held while a seat owns the device.
	pub(crate) fn create(
		id: DeviceId,
		path: &Path,
		touchpad_factory: Option<&DispatchFactory>,
	) -> Result<Self, DeviceError> {
		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.custom_flags(libc::O_CLOEXEC)
			.open(path)
			.map_err(|source| DeviceError::Open { path: path.to_owned(), source })?;
		let fd = file.as_raw_fd();

		let name = device_name(fd);
		let bits = gather_bits(fd)
			.map_err(|source| DeviceError::Query { path: path.to_owned(), source })?;
		let probed =
			probe(&bits).map_err(|_| DeviceError::Unsupported { path: path.to_owned() })?;

		let dispatch: Box<dyn EvdevDispatch> = match (probed.class, touchpad_factory) {
			(DeviceClass::Touchpad, Some(factory)) => factory(&probed),
			_ => Box::new(FallbackDispatch),
		};

		info!(
			device = %name,
			path = %path.display(),
			caps = %probed.caps,
			multitouch = probed.multitouch,
			"input device probed"
		);

		Ok(Self::from_probe(id, path.to_owned(), name, probed, dispatch))
	}

	pub(crate) fn from_probe(
		id: DeviceId,
		path: PathBuf,
		name: String,
		probed: Probe,
		dispatch: Box<dyn EvdevDispatch>,
	) -> Self {
		Self {
			id,
			path,
			name,
			caps: probed.caps,
			ranges: probed.ranges,
			multitouch: probed.multitouch,
			fd: None,
			seat: None,
			leds: Leds::empty(),
			user_data: None,
			norm: Normalizer::new(probed.multitouch),
			dispatch,
		}
	}

	pub fn id(&self) -> DeviceId {
		self.id
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn caps(&self) -> Caps {
		self.caps
	}

	pub fn axis_ranges(&self) -> Option<AxisRanges> {
		self.ranges
	}

	pub fn is_multitouch(&self) -> bool {
		self.multitouch
	}

	pub fn seat_name(&self) -> Option<&str> {
		self.seat.as_deref()
	}

	pub fn set_calibration(&mut self, calibration: Calibration) {
		self.norm.set_calibration(calibration);
	}

	pub fn user_data(&self) -> Option<&dyn Any> {
		self.user_data.as_deref()
	}

	pub fn set_user_data(&mut self, data: Option<Box<dyn Any>>) {
		self.user_data = data;
	}

	pub fn leds(&self) -> Leds {
		self.leds
	}

	/// Pushes the logical LED states to the hardware. No-op for devices
	/// without the LED capability or when the cached state already matches;
	/// the cache follows a successful write.
	pub fn set_leds(&mut self, leds: Leds) {
		if !self.caps.contains(Caps::LED) {
			return;
		}
		if self.leds == leds {
			return;
		}
		let Some(fd) = &self.fd else {
			debug!(device = %self.name, "led update skipped, device fd closed");
			return;
		};

		const MAP: [(Leds, u16); 3] = [
			(Leds::NUM_LOCK, codes::LED_NUML),
			(Leds::CAPS_LOCK, codes::LED_CAPSL),
			(Leds::SCROLL_LOCK, codes::LED_SCROLLL),
		];
		let mut events = [InputEvent::ZERO; 3];
		for (event, (led, code)) in events.iter_mut().zip(MAP) {
			event.kind = codes::EV_LED;
			event.code = code;
			event.value = i32::from(leds.contains(led));
		}

		let written = unsafe {
			libc::write(
				fd.as_raw_fd(),
				events.as_ptr().cast(),
				mem::size_of_val(&events),
			)
		};
		if written < 0 {
			warn!(
				device = %self.name,
				error = %io::Error::last_os_error(),
				"failed to write led state"
			);
			return;
		}
		// Cache only what the hardware actually received.
		if written as usize != mem::size_of_val(&events) {
			warn!(device = %self.name, bytes = written, "short led write, cache not updated");
			return;
		}
		self.leds = leds;
	}

	/// Reads every event currently queued on the fd, in batches, running
	/// each batch through the normalizer before the next read. Called once
	/// per readiness wakeup; draining fully keeps latency flat when the
	/// consumer only polls once per frame.
	pub(crate) fn drain(&mut self, notify: &mut dyn SeatNotify) -> DrainOutcome {
		let Self { id, name, fd, norm, dispatch, .. } = self;
		let Some(fd) = fd.as_ref() else {
			return DrainOutcome::Drained;
		};
		let raw = fd.as_raw_fd();

		let mut events = [InputEvent::ZERO; EVENT_BATCH];
		loop {
			let len = unsafe {
				libc::read(raw, events.as_mut_ptr().cast(), mem::size_of_val(&events))
			};
			if len < 0 {
				let err = io::Error::last_os_error();
				return match err.raw_os_error() {
					Some(libc::EINTR) => continue,
					Some(libc::EAGAIN) => DrainOutcome::Drained,
					Some(libc::ENODEV) => {
						info!(device = %name, "device vanished");
						DrainOutcome::Gone
					}
					_ => {
						warn!(device = %name, error = %err, "read error, dropping batch");
						DrainOutcome::Drained
					}
				};
			}
			let len = len as usize;
			if len == 0 {
				return DrainOutcome::Drained;
			}
			if len % mem::size_of::<InputEvent>() != 0 {
				warn!(device = %name, bytes = len, "misaligned read, dropping batch");
				return DrainOutcome::Drained;
			}
			let count = len / mem::size_of::<InputEvent>();
			norm.process_events(dispatch.as_mut(), notify, *id, &events[..count]);
		}
	}
}

fn device_name(fd: RawFd) -> String {
	let mut buf = [0u8; 256];
	match unsafe { eviocgname(fd, &mut buf) } {
		Ok(_) => {
			let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
			String::from_utf8_lossy(&buf[..end]).into_owned()
		}
		Err(_) => "unknown".to_owned(),
	}
}

fn read_absinfo(
	fd: RawFd,
	read: unsafe fn(libc::c_int, *mut libc::input_absinfo) -> nix::Result<libc::c_int>,
) -> Result<AxisRange, Errno> {
	let mut info: libc::input_absinfo = unsafe { mem::zeroed() };
	unsafe { read(fd, &mut info) }?;
	Ok(AxisRange { minimum: info.minimum, maximum: info.maximum })
}

fn gather_bits(fd: RawFd) -> Result<DeviceBits, Errno> {
	let mut bits = DeviceBits::default();
	unsafe { eviocgbit_ev(fd, &mut bits.ev) }?;

	if test_bit(&bits.ev, codes::EV_ABS) {
		unsafe { eviocgbit_abs(fd, &mut bits.abs) }?;
		if test_bit(&bits.abs, codes::ABS_X) {
			bits.abs_x = Some(read_absinfo(fd, eviocgabs_x)?);
		}
		if test_bit(&bits.abs, codes::ABS_Y) {
			bits.abs_y = Some(read_absinfo(fd, eviocgabs_y)?);
		}
		if test_bit(&bits.abs, codes::ABS_MT_SLOT) {
			bits.mt_x = Some(read_absinfo(fd, eviocgabs_mt_x)?);
			bits.mt_y = Some(read_absinfo(fd, eviocgabs_mt_y)?);
		}
	}
	if test_bit(&bits.ev, codes::EV_REL) {
		unsafe { eviocgbit_rel(fd, &mut bits.rel) }?;
	}
	if test_bit(&bits.ev, codes::EV_KEY) {
		unsafe { eviocgbit_key(fd, &mut bits.key) }?;
	}
	if test_bit(&bits.ev, codes::EV_LED) {
		unsafe { eviocgbit_led(fd, &mut bits.led) }?;
	}
	Ok(bits)
}
