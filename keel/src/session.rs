//! VT session arbitration: the console takeover transaction, the
//! release/acquire handshake driven by the kernel's switch signal, and the
//! reverse-order restoration at teardown.
//!
//! The integrating event loop owns signal delivery; it must route
//! [`SWITCH_SIGNAL`] to [`VtSession::on_switch_signal`] and should prioritize
//! it over device readiness so a switch request is never starved behind
//! input processing.

use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use nix::errno::Errno;
use nix::sys::termios::{self, FlushArg, OutputFlags, SetArg, Termios};
use nix::{ioctl_read_bad, ioctl_write_int_bad, ioctl_write_ptr_bad};
use thiserror::Error;
use tracing::{info, warn};

use crate::codes;

/// Signal the kernel raises for both sides of the VT switch handshake.
pub const SWITCH_SIGNAL: libc::c_int = libc::SIGUSR1;

const TTY_MAJOR: u64 = 4;

#[repr(C)]
struct VtMode {
	mode: libc::c_char,
	waitv: libc::c_char,
	relsig: libc::c_short,
	acqsig: libc::c_short,
	frsig: libc::c_short,
}

#[repr(C)]
struct VtStat {
	v_active: libc::c_ushort,
	v_signal: libc::c_ushort,
	v_state: libc::c_ushort,
}

ioctl_read_bad!(vt_openqry, codes::VT_OPENQRY, libc::c_int);
ioctl_write_ptr_bad!(vt_setmode, codes::VT_SETMODE, VtMode);
ioctl_read_bad!(vt_getstate, codes::VT_GETSTATE, VtStat);
ioctl_write_int_bad!(vt_reldisp, codes::VT_RELDISP);
ioctl_write_int_bad!(vt_activate, codes::VT_ACTIVATE);
ioctl_write_int_bad!(vt_waitactive, codes::VT_WAITACTIVE);
ioctl_write_int_bad!(kdsetmode, codes::KDSETMODE);
ioctl_read_bad!(kdgkbmode, codes::KDGKBMODE, libc::c_int);
ioctl_write_int_bad!(kdskbmode, codes::KDSKBMODE);

/// The setup step that failed; prior steps have been rolled back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupStep {
	SwitchVt,
	SaveAttributes,
	RawMode,
	KeyboardMode,
	GraphicsMode,
	VtTakeover,
}

impl fmt::Display for SetupStep {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let text = match self {
			SetupStep::SwitchVt => "switching to the target vt",
			SetupStep::SaveAttributes => "saving terminal attributes",
			SetupStep::RawMode => "entering raw input mode",
			SetupStep::KeyboardMode => "disabling keyboard decoding",
			SetupStep::GraphicsMode => "entering graphics mode",
			SetupStep::VtTakeover => "taking over vt switching",
		};
		write!(f, "{text}")
	}
}

#[derive(Debug, Error)]
pub enum SessionError {
	#[error("could not open console {path}: {source}")]
	OpenConsole { path: PathBuf, source: io::Error },
	#[error("console descriptor does not name a virtual terminal")]
	NotAVt,
	#[error("no free virtual terminal available")]
	NoFreeVt,
	#[error("session setup failed while {step}: {source}")]
	Setup { step: SetupStep, source: Errno },
}

/// Session-visible side of a VT switch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VtEvent {
	/// The session regained the VT; graphics may resume.
	Enter,
	/// The session is being switched away from; stop touching the hardware.
	Leave,
}

/// The kernel console operations the session transaction runs over. Split
/// out so the takeover/rollback/handshake logic is exercised against a
/// recording fake.
pub trait Console {
	fn current_vt(&mut self) -> Result<i32, Errno>;
	fn activate(&mut self, vt: i32) -> Result<(), Errno>;
	fn wait_active(&mut self, vt: i32) -> Result<(), Errno>;
	fn save_attributes(&mut self) -> Result<(), Errno>;
	fn enter_raw_mode(&mut self) -> Result<(), Errno>;
	fn restore_attributes(&mut self) -> Result<(), Errno>;
	fn keyboard_mode(&mut self) -> Result<libc::c_int, Errno>;
	fn set_keyboard_mode(&mut self, mode: libc::c_int) -> Result<(), Errno>;
	fn set_graphics_mode(&mut self) -> Result<(), Errno>;
	fn set_text_mode(&mut self) -> Result<(), Errno>;
	fn take_vt_control(&mut self) -> Result<(), Errno>;
	fn release_vt_control(&mut self) -> Result<(), Errno>;
	fn ack_release(&mut self) -> Result<(), Errno>;
	fn ack_acquire(&mut self) -> Result<(), Errno>;
	fn drain_input(&mut self) -> Result<(), Errno>;
}

/// Where the session's console comes from.
pub enum ConsoleTarget {
	/// A caller-supplied descriptor, accepted only if it names a VT.
	Descriptor(OwnedFd),
	/// Open `/dev/ttyN` explicitly.
	Vt(i32),
	/// Allocate a fresh VT via the kernel. Typically requires root.
	Auto,
}

pub struct KernelConsole {
	fd: OwnedFd,
	saved_attributes: Option<Termios>,
}

impl KernelConsole {
	/// Resolves the target to an open console descriptor and its VT number.
	pub fn open(target: ConsoleTarget) -> Result<(Self, i32), SessionError> {
		let (fd, vt) = match target {
			ConsoleTarget::Vt(vt) => (open_console(&vt_path(vt))?, vt),
			ConsoleTarget::Descriptor(fd) => {
				let vt = vt_of_descriptor(&fd).ok_or(SessionError::NotAVt)?;
				(fd, vt)
			}
			ConsoleTarget::Auto => {
				let vt = allocate_vt()?;
				info!(vt, "using freshly allocated vt");
				(open_console(&vt_path(vt))?, vt)
			}
		};
		Ok((Self { fd, saved_attributes: None }, vt))
	}
}

fn vt_path(vt: i32) -> PathBuf {
	PathBuf::from(format!("/dev/tty{vt}"))
}

fn open_console(path: &PathBuf) -> Result<OwnedFd, SessionError> {
	OpenOptions::new()
		.read(true)
		.write(true)
		.custom_flags(libc::O_NOCTTY | libc::O_CLOEXEC)
		.open(path)
		.map(OwnedFd::from)
		.map_err(|source| SessionError::OpenConsole { path: path.clone(), source })
}

fn vt_of_descriptor(fd: &OwnedFd) -> Option<i32> {
	let mut stat: libc::stat = unsafe { mem::zeroed() };
	if unsafe { libc::fstat(fd.as_raw_fd(), &mut stat) } < 0 {
		return None;
	}
	if stat.st_mode & libc::S_IFMT != libc::S_IFCHR {
		return None;
	}
	let major = u64::from(libc::major(stat.st_rdev));
	let minor = u64::from(libc::minor(stat.st_rdev));
	(major == TTY_MAJOR && minor > 0).then_some(minor as i32)
}

fn allocate_vt() -> Result<i32, SessionError> {
	let tty0 = OpenOptions::new()
		.write(true)
		.custom_flags(libc::O_CLOEXEC)
		.open("/dev/tty0")
		.map_err(|source| SessionError::OpenConsole {
			path: PathBuf::from("/dev/tty0"),
			source,
		})?;
	let mut vt: libc::c_int = 0;
	match unsafe { vt_openqry(tty0.as_raw_fd(), &mut vt) } {
		Ok(_) if vt > 0 => Ok(vt),
		_ => Err(SessionError::NoFreeVt),
	}
}

impl Console for KernelConsole {
	fn current_vt(&mut self) -> Result<i32, Errno> {
		let mut state = VtStat { v_active: 0, v_signal: 0, v_state: 0 };
		unsafe { vt_getstate(self.fd.as_raw_fd(), &mut state) }?;
		Ok(i32::from(state.v_active))
	}

	fn activate(&mut self, vt: i32) -> Result<(), Errno> {
		unsafe { vt_activate(self.fd.as_raw_fd(), vt) }.map(drop)
	}

	fn wait_active(&mut self, vt: i32) -> Result<(), Errno> {
		unsafe { vt_waitactive(self.fd.as_raw_fd(), vt) }.map(drop)
	}

	fn save_attributes(&mut self) -> Result<(), Errno> {
		self.saved_attributes = Some(termios::tcgetattr(self.fd.as_fd())?);
		Ok(())
	}

	fn enter_raw_mode(&mut self) -> Result<(), Errno> {
		let mut raw = self.saved_attributes.clone().ok_or(Errno::EINVAL)?;
		termios::cfmakeraw(&mut raw);
		// cfmakeraw hoses line endings; put them back.
		raw.output_flags |= OutputFlags::OPOST | OutputFlags::OCRNL;
		termios::tcsetattr(self.fd.as_fd(), SetArg::TCSANOW, &raw)
	}

	fn restore_attributes(&mut self) -> Result<(), Errno> {
		let saved = self.saved_attributes.as_ref().ok_or(Errno::EINVAL)?;
		termios::tcsetattr(self.fd.as_fd(), SetArg::TCSANOW, saved)
	}

	fn keyboard_mode(&mut self) -> Result<libc::c_int, Errno> {
		let mut mode: libc::c_int = 0;
		unsafe { kdgkbmode(self.fd.as_raw_fd(), &mut mode) }?;
		Ok(mode)
	}

	fn set_keyboard_mode(&mut self, mode: libc::c_int) -> Result<(), Errno> {
		unsafe { kdskbmode(self.fd.as_raw_fd(), mode) }.map(drop)
	}

	fn set_graphics_mode(&mut self) -> Result<(), Errno> {
		unsafe { kdsetmode(self.fd.as_raw_fd(), codes::KD_GRAPHICS) }.map(drop)
	}

	fn set_text_mode(&mut self) -> Result<(), Errno> {
		unsafe { kdsetmode(self.fd.as_raw_fd(), codes::KD_TEXT) }.map(drop)
	}

	fn take_vt_control(&mut self) -> Result<(), Errno> {
		let mode = VtMode {
			mode: codes::VT_PROCESS as libc::c_char,
			waitv: 0,
			relsig: SWITCH_SIGNAL as libc::c_short,
			acqsig: SWITCH_SIGNAL as libc::c_short,
			frsig: 0,
		};
		unsafe { vt_setmode(self.fd.as_raw_fd(), &mode) }.map(drop)
	}

	fn release_vt_control(&mut self) -> Result<(), Errno> {
		let mode = VtMode {
			mode: codes::VT_AUTO as libc::c_char,
			waitv: 0,
			relsig: 0,
			acqsig: 0,
			frsig: 0,
		};
		unsafe { vt_setmode(self.fd.as_raw_fd(), &mode) }.map(drop)
	}

	fn ack_release(&mut self) -> Result<(), Errno> {
		unsafe { vt_reldisp(self.fd.as_raw_fd(), 1) }.map(drop)
	}

	fn ack_acquire(&mut self) -> Result<(), Errno> {
		unsafe { vt_reldisp(self.fd.as_raw_fd(), codes::VT_ACKACQ) }.map(drop)
	}

	fn drain_input(&mut self) -> Result<(), Errno> {
		termios::tcflush(self.fd.as_fd(), FlushArg::TCIFLUSH)
	}
}

/// One session's exclusive hold on a virtual terminal.
///
/// Created in the owning state; ownership then toggles strictly on switch
/// signals. Dropping the session restores the console and, when the VT was
/// changed at setup, switches back.
pub struct VtSession {
	console: Box<dyn Console>,
	vt: i32,
	starting_vt: i32,
	owns_vt: bool,
	saved_kb_mode: libc::c_int,
	needs_input_drain: bool,
	vt_func: Box<dyn FnMut(VtEvent)>,
	torn_down: bool,
}

impl VtSession {
	/// Opens the kernel console for `target` and runs the takeover
	/// transaction. On failure every completed step is rolled back in
	/// reverse order and no session exists.
	pub fn create(
		target: ConsoleTarget,
		vt_func: Box<dyn FnMut(VtEvent)>,
	) -> Result<Self, SessionError> {
		let (console, vt) = KernelConsole::open(target)?;
		Self::with_console(Box::new(console), vt, vt_func)
	}

	/// Runs the takeover transaction over an already-resolved console.
	pub fn with_console(
		mut console: Box<dyn Console>,
		vt: i32,
		vt_func: Box<dyn FnMut(VtEvent)>,
	) -> Result<Self, SessionError> {
		let starting_vt = console.current_vt().unwrap_or(vt);
		let switched = starting_vt != vt;
		if switched {
			if let Err(source) = console.activate(vt).and_then(|()| console.wait_active(vt)) {
				return Err(SessionError::Setup { step: SetupStep::SwitchVt, source });
			}
		}

		let (saved_kb_mode, needs_input_drain) = match configure_console(console.as_mut()) {
			Ok(state) => state,
			Err(err) => {
				if switched {
					let _ = console.activate(starting_vt);
					let _ = console.wait_active(starting_vt);
				}
				return Err(err);
			}
		};

		info!(vt, starting_vt, "vt session established");
		Ok(Self {
			console,
			vt,
			starting_vt,
			owns_vt: true,
			saved_kb_mode,
			needs_input_drain,
			vt_func,
			torn_down: false,
		})
	}

	pub fn vt(&self) -> i32 {
		self.vt
	}

	pub fn owns_vt(&self) -> bool {
		self.owns_vt
	}

	/// True when keyboard decoding could only be set to raw, in which case
	/// the integrator must call [`drain_input`](Self::drain_input) whenever
	/// the console fd becomes readable.
	pub fn needs_input_drain(&self) -> bool {
		self.needs_input_drain
	}

	/// Discards queued console input; keyboard events arrive via evdev.
	pub fn drain_input(&mut self) {
		if let Err(error) = self.console.drain_input() {
			warn!(%error, "failed to flush console input");
		}
	}

	/// The switch-signal handler body. Strictly alternates ownership: when
	/// owning, runs the leaving callback and acknowledges the release; when
	/// relinquished, acknowledges the acquisition and runs the entering
	/// callback.
	pub fn on_switch_signal(&mut self) {
		if self.owns_vt {
			(self.vt_func)(VtEvent::Leave);
			self.owns_vt = false;
			if let Err(error) = self.console.ack_release() {
				warn!(%error, "failed to acknowledge vt release");
			}
		} else {
			if let Err(error) = self.console.ack_acquire() {
				warn!(%error, "failed to acknowledge vt acquisition");
			}
			(self.vt_func)(VtEvent::Enter);
			self.owns_vt = true;
		}
	}

	/// Asks the kernel to switch the active console. Local state changes
	/// only once the resulting switch signal arrives.
	pub fn activate(&mut self, vt: i32) -> Result<(), Errno> {
		self.console.activate(vt)
	}

	/// Restores the console: keyboard mode, text mode, terminal attributes
	/// and automatic VT switching, then switches back to the original VT if
	/// setup moved away from it. Runs once; later calls (including the one
	/// from `Drop`) are no-ops.
	pub fn reset(&mut self) {
		if mem::replace(&mut self.torn_down, true) {
			return;
		}
		if let Err(error) = self.console.set_keyboard_mode(self.saved_kb_mode) {
			warn!(%error, "failed to restore keyboard mode");
		}
		if let Err(error) = self.console.set_text_mode() {
			warn!(%error, "failed to restore text mode");
		}
		if let Err(error) = self.console.restore_attributes() {
			warn!(%error, "could not restore terminal attributes");
		}
		if let Err(error) = self.console.release_vt_control() {
			warn!(%error, "could not reset vt handling");
		}
		if self.owns_vt && self.vt != self.starting_vt {
			let _ = self.console.activate(self.starting_vt);
			let _ = self.console.wait_active(self.starting_vt);
		}
	}
}

impl Drop for VtSession {
	fn drop(&mut self) {
		self.reset();
	}
}

/// The console-local half of the takeover: save termios, raw mode, keyboard
/// off, graphics mode, VT_PROCESS. Undoes its own completed steps in reverse
/// on failure; switching back to the starting VT is the caller's rollback.
fn configure_console(console: &mut dyn Console) -> Result<(libc::c_int, bool), SessionError> {
	let step = |step, source| SessionError::Setup { step, source };

	if let Err(source) = console.save_attributes() {
		return Err(step(SetupStep::SaveAttributes, source));
	}

	if let Err(source) = console.enter_raw_mode() {
		return Err(step(SetupStep::RawMode, source));
	}

	let saved_kb_mode = match console.keyboard_mode() {
		Ok(mode) => mode,
		Err(source) => {
			let _ = console.restore_attributes();
			return Err(step(SetupStep::KeyboardMode, source));
		}
	};
	let mut needs_input_drain = false;
	if console.set_keyboard_mode(codes::K_OFF).is_err() {
		// Kernels before 2.6.38 lack K_OFF; with K_RAW the console fd
		// still queues input and must be drained by the integrator.
		match console.set_keyboard_mode(codes::K_RAW) {
			Ok(()) => needs_input_drain = true,
			Err(source) => {
				let _ = console.restore_attributes();
				return Err(step(SetupStep::KeyboardMode, source));
			}
		}
	}

	if let Err(source) = console.set_graphics_mode() {
		let _ = console.set_keyboard_mode(saved_kb_mode);
		let _ = console.restore_attributes();
		return Err(step(SetupStep::GraphicsMode, source));
	}

	if let Err(source) = console.take_vt_control() {
		let _ = console.set_text_mode();
		let _ = console.set_keyboard_mode(saved_kb_mode);
		let _ = console.restore_attributes();
		return Err(step(SetupStep::VtTakeover, source));
	}

	Ok((saved_kb_mode, needs_input_drain))
}
