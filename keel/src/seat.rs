//! A seat: a named grouping of input devices delivering into one
//! notification table.

use std::collections::BTreeSet;

use crate::event::{DeviceId, SeatNotify};

pub struct Seat {
	name: String,
	pub(crate) devices: BTreeSet<DeviceId>,
	notify: Box<dyn SeatNotify>,
}

impl Seat {
	pub fn new(name: impl Into<String>, notify: Box<dyn SeatNotify>) -> Self {
		Self { name: name.into(), devices: BTreeSet::new(), notify }
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Ids of the devices currently bound to this seat.
	pub fn devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
		self.devices.iter().copied()
	}

	pub(crate) fn notify_mut(&mut self) -> &mut dyn SeatNotify {
		self.notify.as_mut()
	}
}
