use std::os::fd::{AsFd, AsRawFd, BorrowedFd};

use nix::sys::signal::{signal, sigprocmask, SigHandler, SigmaskHow};
use nix::sys::signalfd::{SfdFlags, SignalFd};

use crate::error::{Error, Result};
use crate::types::{SignalKind, SignalRecord, SignalSet};

/// Signals of a [`SignalSet`] surfaced as a readable descriptor.
///
/// Creating the channel blocks the set for the calling thread, so it has to
/// happen before any other thread is spawned for the mask to cover the whole
/// process. From then on those signals are only observable here.
///
/// An ignored signal is discarded before it can become pending, so a set
/// containing broken-pipe also restores its default disposition (the Rust
/// runtime ignores `SIGPIPE`). Being blocked, it still never terminates us.
pub struct SignalChannel {
	fd: SignalFd,
}

impl SignalChannel {
	pub fn create(set: &SignalSet) -> Result<Self> {
		let mask = set.to_sigset();
		sigprocmask(SigmaskHow::SIG_BLOCK, Some(&mask), None).map_err(Error::setup("sigprocmask"))?;
		if set.contains(SignalKind::BrokenPipe) {
			// SAFETY: restoring the default disposition installs no handler.
			unsafe { signal(SignalKind::BrokenPipe.signal(), SigHandler::SigDfl) }
				.map_err(Error::setup("signal(SIGPIPE)"))?;
		}
		let fd = SignalFd::with_flags(&mask, SfdFlags::SFD_CLOEXEC | SfdFlags::SFD_NONBLOCK)
			.map_err(Error::setup("signalfd"))?;
		tracing::debug!(fd = fd.as_raw_fd(), "signal channel open");
		Ok(Self { fd })
	}

	/// Reads one pending signal. Only call after the poller reported the
	/// channel readable.
	pub fn read(&mut self) -> Result<SignalRecord> {
		match self.fd.read_signal() {
			Ok(Some(info)) => Ok(SignalRecord::from_raw(info.ssi_signo as i32, info.ssi_pid)),
			Ok(None) => Err(Error::Io {
				what: "signal channel",
				source: std::io::ErrorKind::WouldBlock.into(),
			}),
			Err(errno) => Err(Error::Io {
				what: "signal channel",
				source: errno.into(),
			}),
		}
	}

	pub fn close(self) -> Result<()> {
		let raw = self.fd.as_raw_fd();
		std::mem::forget(self.fd);
		nix::unistd::close(raw).map_err(Error::cleanup("signal channel"))
	}
}

impl AsFd for SignalChannel {
	fn as_fd(&self) -> BorrowedFd<'_> {
		self.fd.as_fd()
	}
}
