//! Input plumbing for a graphical session host: evdev device discovery and
//! normalization on one side, virtual-terminal arbitration on the other.
//!
//! The crate is event-loop agnostic. The integrator polls device fds and the
//! switch signal itself and calls back in: [`DeviceRegistry::on_readable`]
//! for device readiness, [`VtSession::on_switch_signal`] for VT handshakes.
//! Normalized input is delivered through a [`SeatNotify`] implementation, one
//! per [`Seat`], with coordinates in 24.8 fixed point ([`Fixed`]).

pub mod codes;
pub mod device;
pub mod event;
pub mod fixed;
pub mod normalize;
pub mod probe;
pub mod registry;
pub mod seat;
pub mod session;

pub use device::{DeviceError, DispatchFactory, EvdevDevice};
pub use event::{
	ButtonState, Caps, DeviceId, KeyState, Leds, ScrollAxis, SeatNotify, TouchState,
};
pub use fixed::Fixed;
pub use normalize::{Calibration, EvdevDispatch, FallbackDispatch, Normalizer};
pub use probe::{AxisRange, AxisRanges, DeviceClass, Probe, UnsupportedDevice, probe};
pub use registry::{DeviceRegistry, SeatError};
pub use seat::Seat;
pub use session::{
	Console, ConsoleTarget, SWITCH_SIGNAL, SessionError, SetupStep, VtEvent, VtSession,
};
