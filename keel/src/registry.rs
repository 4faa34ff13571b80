//! The device registry: an explicitly owned discovery context that creates
//! devices from hotplug notifications, binds them to seats, and routes
//! readiness wakeups through the normalizer.
//!
//! Devices are indexed by stable id and seats hold id sets, so "a device
//! belongs to at most one seat" is enforced structurally instead of through
//! back-pointers.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::device::{DeviceError, DispatchFactory, DrainOutcome, EvdevDevice};
use crate::event::{DeviceId, Leds};
use crate::seat::Seat;

#[derive(Debug, Error)]
pub enum SeatError {
	#[error("unknown device {0}")]
	UnknownDevice(DeviceId),
	#[error("device {path} already belongs to seat `{seat}`")]
	AlreadySeated { path: PathBuf, seat: String },
	#[error("failed to open {path}: {source}")]
	Open { path: PathBuf, source: io::Error },
}

#[derive(Default)]
pub struct DeviceRegistry {
	devices: HashMap<DeviceId, EvdevDevice>,
	next_id: u32,
	touchpad_factory: Option<DispatchFactory>,
}

impl DeviceRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Installs the factory producing the specialized touchpad dispatch for
	/// devices the capability probe classifies as touchpads.
	pub fn set_touchpad_factory(&mut self, factory: DispatchFactory) {
		self.touchpad_factory = Some(factory);
	}

	/// Thin discovery glue: the event nodes currently present under
	/// `/dev/input`, sorted.
	pub fn enumerate_event_nodes() -> io::Result<Vec<PathBuf>> {
		let mut nodes = Vec::new();
		for entry in fs::read_dir("/dev/input")? {
			let entry = entry?;
			if entry.file_name().to_string_lossy().starts_with("event") {
				nodes.push(entry.path());
			}
		}
		nodes.sort();
		Ok(nodes)
	}

	/// Handles a "device appeared" notification: probes the node and, when
	/// it carries recognized capabilities, registers it. Open and probe
	/// failures are local to this device.
	pub fn device_added(&mut self, path: &Path) -> Result<DeviceId, DeviceError> {
		let id = DeviceId(self.next_id);
		let device = EvdevDevice::create(id, path, self.touchpad_factory.as_ref())?;
		self.next_id += 1;
		self.devices.insert(id, device);
		Ok(id)
	}

	/// Handles a "device removed" notification: unbinds the device from its
	/// seat and destroys it. Unknown paths are tolerated; a notification
	/// naming a seat the device does not belong to is refused so the owning
	/// seat is never left holding a destroyed id.
	pub fn device_removed(&mut self, path: &Path, seat: &mut Seat) -> Option<DeviceId> {
		let id = {
			let device = self.devices.values().find(|d| d.path() == path)?;
			if device.seat.as_deref().is_some_and(|owner| owner != seat.name()) {
				warn!(
					device = %device.name(),
					seat = seat.name(),
					"removal notification from a seat this device does not belong to"
				);
				return None;
			}
			device.id()
		};
		self.remove_from_seat(id, seat);
		let device = self.devices.remove(&id)?;
		info!(device = %device.name(), path = %path.display(), "input device removed");
		Some(id)
	}

	pub fn device(&self, id: DeviceId) -> Option<&EvdevDevice> {
		self.devices.get(&id)
	}

	pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut EvdevDevice> {
		self.devices.get_mut(&id)
	}

	pub fn devices(&self) -> impl Iterator<Item = &EvdevDevice> {
		self.devices.values()
	}

	/// Opens the device for non-blocking reads and links it to the seat.
	/// Returns the raw fd for the caller to register read-readiness on; a
	/// failed open leaves no linkage behind.
	pub fn add_to_seat(&mut self, id: DeviceId, seat: &mut Seat) -> Result<RawFd, SeatError> {
		let device = self.devices.get_mut(&id).ok_or(SeatError::UnknownDevice(id))?;
		if let Some(owner) = &device.seat {
			return Err(SeatError::AlreadySeated {
				path: device.path().to_owned(),
				seat: owner.clone(),
			});
		}

		let file = fs::OpenOptions::new()
			.read(true)
			.write(true)
			.custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
			.open(device.path())
			.map_err(|source| SeatError::Open { path: device.path().to_owned(), source })?;
		let fd = file.as_raw_fd();

		device.fd = Some(file.into());
		device.seat = Some(seat.name().to_owned());
		seat.devices.insert(id);
		Ok(fd)
	}

	/// Unbinds a device from its seat, closing the event fd. Idempotent:
	/// removing an unbound or unknown device is a no-op, and only the owning
	/// seat can unbind so the owner's device set and the device's back
	/// reference always move together.
	pub fn remove_from_seat(&mut self, id: DeviceId, seat: &mut Seat) {
		let Some(device) = self.devices.get_mut(&id) else {
			return;
		};
		if device.seat.is_none() {
			return;
		}
		if device.seat.as_deref() != Some(seat.name()) {
			warn!(
				device = %device.name(),
				seat = seat.name(),
				"unbind request from a seat this device does not belong to"
			);
			return;
		}
		seat.devices.remove(&id);
		device.seat = None;
		device.fd = None;
		device.leds = Leds::empty();
	}

	/// Read-readiness callback for a device fd: drains all queued events
	/// through the seat's notification table. A device the kernel reports
	/// gone is destroyed and unlinked here.
	pub fn on_readable(&mut self, id: DeviceId, seat: &mut Seat) {
		let gone = {
			let Some(device) = self.devices.get_mut(&id) else {
				return;
			};
			if device.seat.as_deref() != Some(seat.name()) {
				warn!(device = %device.name(), seat = seat.name(), "readiness for a device this seat does not own");
				return;
			}
			device.drain(seat.notify_mut()) == DrainOutcome::Gone
		};
		if gone {
			self.remove_from_seat(id, seat);
			if let Some(device) = self.devices.remove(&id) {
				info!(device = %device.name(), "destroyed vanished device");
			}
		}
	}
}
