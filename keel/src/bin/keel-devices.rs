//! Opens every recognized evdev node on the configured seat and logs the
//! normalized event stream. Handy for checking what the capability probe and
//! the normalizer make of a machine's input hardware.
//!
//! Reads from `/dev/input`, so it usually needs to run as root or with the
//! `input` group. Seat name comes from `KEEL_SEAT` (default `seat0`), log
//! filtering from `RUST_LOG`.

use std::collections::HashMap;
use std::env;
use std::io;
use std::os::fd::RawFd;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use keel::{
	ButtonState, DeviceId, DeviceRegistry, Fixed, KeyState, ScrollAxis, Seat, SeatNotify,
	TouchState,
};

struct LogNotify;

impl SeatNotify for LogNotify {
	fn motion(&mut self, device: DeviceId, time: u32, dx: Fixed, dy: Fixed) {
		info!(%device, time, %dx, %dy, "motion");
	}

	fn motion_absolute(&mut self, device: DeviceId, time: u32, x: Fixed, y: Fixed) {
		info!(%device, time, %x, %y, "motion absolute");
	}

	fn button(&mut self, device: DeviceId, time: u32, button: u16, state: ButtonState) {
		info!(%device, time, button, ?state, "button");
	}

	fn axis(&mut self, device: DeviceId, time: u32, axis: ScrollAxis, value: Fixed) {
		info!(%device, time, ?axis, %value, "axis");
	}

	fn key(&mut self, device: DeviceId, time: u32, key: u16, state: KeyState) {
		info!(%device, time, key, ?state, "key");
	}

	fn touch(&mut self, device: DeviceId, time: u32, slot: i32, x: Fixed, y: Fixed, state: TouchState) {
		info!(%device, time, slot, %x, %y, ?state, "touch");
	}
}

fn main() -> io::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
		.init();

	let seat_name = env::var("KEEL_SEAT").unwrap_or_else(|_| "seat0".to_owned());
	let mut seat = Seat::new(seat_name.clone(), Box::new(LogNotify));
	let mut registry = DeviceRegistry::new();
	let mut fds: HashMap<RawFd, DeviceId> = HashMap::new();

	for path in DeviceRegistry::enumerate_event_nodes()? {
		let id = match registry.device_added(&path) {
			Ok(id) => id,
			Err(error) => {
				warn!(path = %path.display(), %error, "skipping device");
				continue;
			}
		};
		match registry.add_to_seat(id, &mut seat) {
			Ok(fd) => {
				fds.insert(fd, id);
			}
			Err(error) => {
				warn!(path = %path.display(), %error, "could not bind device");
			}
		}
	}
	if fds.is_empty() {
		warn!(seat = %seat_name, "no usable input devices found");
		return Ok(());
	}
	info!(seat = %seat_name, devices = fds.len(), "watching input devices, ^C to quit");

	loop {
		let mut pollfds: Vec<libc::pollfd> = fds
			.keys()
			.map(|&fd| libc::pollfd { fd, events: libc::POLLIN, revents: 0 })
			.collect();
		let ready =
			unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, -1) };
		if ready < 0 {
			let err = io::Error::last_os_error();
			if err.raw_os_error() == Some(libc::EINTR) {
				continue;
			}
			return Err(err);
		}

		for pollfd in pollfds.iter().filter(|p| p.revents != 0) {
			if let Some(&id) = fds.get(&pollfd.fd) {
				registry.on_readable(id, &mut seat);
			}
		}
		// Devices the kernel reported gone were destroyed during draining.
		fds.retain(|_, id| registry.device(*id).is_some());
		if fds.is_empty() {
			info!("all devices vanished, exiting");
			return Ok(());
		}
	}
}
