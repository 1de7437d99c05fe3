use std::io;

use crate::error::{Error, Result};
use crate::launcher::{self, LaunchSpec};
use crate::output::{CaptureChannel, CaptureReader};
use crate::poller::{Interest, Poller};
use crate::reaper;
use crate::signals::SignalChannel;
use crate::supervisor::{Endpoints, SupervisorConfig};
use crate::types::*;

/// The descriptors of one supervised child, wired to the real OS.
///
/// Dropping a session closes whatever is still open.
pub struct Session {
	poller: Option<Poller>,
	signals: Option<SignalChannel>,
	captures: [Option<CaptureReader>; 2],
	child: ChildHandle,
}

impl Session {
	/// Masks the supervised signals, opens the signal channel, the poller and
	/// both capture pipes, then launches the child.
	///
	/// Call before any other thread exists: the signal mask is per thread.
	pub fn start(spec: &LaunchSpec, config: &SupervisorConfig) -> Result<Self> {
		config.validate()?;

		let signals = SignalChannel::create(&SignalSet::supervised())?;
		let mut poller = Poller::new(config.max_events)?;
		poller.register(&signals, Source::Signals, Interest::Readable)?;

		let (stdout, stdout_w) = CaptureChannel::create(Stream::Stdout)?;
		let (stderr, stderr_w) = CaptureChannel::create(Stream::Stderr)?;
		poller.register(&stdout, Source::Capture(Stream::Stdout), Interest::Capture)?;
		poller.register(&stderr, Source::Capture(Stream::Stderr), Interest::Capture)?;

		if spec.is_fallback() {
			tracing::warn!(program = spec.program(), "no program given, running fallback command");
		}
		let child = launcher::launch(spec, stdout_w, stderr_w)?;

		Ok(Self {
			poller: Some(poller),
			signals: Some(signals),
			captures: [Some(stdout), Some(stderr)],
			child,
		})
	}

	pub fn child(&self) -> ChildHandle {
		self.child
	}

	fn poller(&mut self) -> Result<&mut Poller> {
		self.poller.as_mut().ok_or_else(|| closed("poller"))
	}
}

fn closed(what: &'static str) -> Error {
	Error::Io {
		what,
		source: io::ErrorKind::NotConnected.into(),
	}
}

impl Endpoints for Session {
	fn child_pid(&self) -> Option<u32> {
		Some(self.child.id())
	}

	fn wait(&mut self) -> Result<Vec<ReadinessEvent>> {
		self.poller()?.wait()
	}

	fn read_signal(&mut self) -> Result<SignalRecord> {
		self.signals
			.as_mut()
			.ok_or_else(|| closed("signal channel"))?
			.read()
	}

	fn drain(&mut self, stream: Stream, buf: &mut [u8]) -> Result<Drained> {
		self.captures[stream.index()]
			.as_mut()
			.ok_or_else(|| closed(stream.name()))?
			.drain(buf)
	}

	fn close(&mut self, stream: Stream) -> Result<()> {
		let reader = self.captures[stream.index()]
			.take()
			.ok_or_else(|| closed(stream.name()))?;
		self.poller()?.unregister(&reader)?;
		reader.close()
	}

	fn reap(&mut self) -> Result<Reaped> {
		reaper::reap(self.child)
	}

	fn shutdown(&mut self) -> Result<()> {
		if let Some(signals) = self.signals.take() {
			self.poller()?.unregister(&signals)?;
			signals.close()?;
		}
		if let Some(poller) = self.poller.take() {
			poller.close()?;
		}
		tracing::debug!("signal channel and poller closed");
		Ok(())
	}
}
