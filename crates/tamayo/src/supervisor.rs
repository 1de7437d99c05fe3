use std::io::Write;

use crate::error::{Error, Result};
use crate::output::{self, FINAL_DRAIN_LIMIT, READ_BUFFER_SIZE};
use crate::poller::MAX_EVENTS;
use crate::types::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
	/// Upper bound of one read from a capture pipe.
	pub read_buffer_size: usize,
	/// Events collected per poller wait.
	pub max_events: usize,
	/// Bytes flushed from each capture pipe after the child exits normally.
	pub final_drain_limit: usize,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			read_buffer_size: READ_BUFFER_SIZE,
			max_events: MAX_EVENTS,
			final_drain_limit: FINAL_DRAIN_LIMIT,
		}
	}
}

impl SupervisorConfig {
	pub fn validate(&self) -> Result<()> {
		if self.read_buffer_size == 0 {
			return Err(Error::Config("read_buffer_size must be at least 1".into()));
		}
		if self.max_events == 0 {
			return Err(Error::Config("max_events must be at least 1".into()));
		}
		if self.final_drain_limit == 0 {
			return Err(Error::Config("final_drain_limit must be at least 1".into()));
		}
		Ok(())
	}
}

/// Everything the state machine needs from the outside world.
///
/// [`crate::Session`] backs it with signalfd, epoll, pipes and waitid.
pub trait Endpoints {
	fn child_pid(&self) -> Option<u32>;

	/// Blocks until at least one channel is ready.
	fn wait(&mut self) -> Result<Vec<ReadinessEvent>>;

	fn read_signal(&mut self) -> Result<SignalRecord>;

	/// One bounded read from a capture channel.
	fn drain(&mut self, stream: Stream, buf: &mut [u8]) -> Result<Drained>;

	/// Unregisters and closes a capture channel.
	fn close(&mut self, stream: Stream) -> Result<()>;

	fn reap(&mut self) -> Result<Reaped>;

	/// Closes the signal channel and the poller.
	fn shutdown(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
	Continue,
	Quit,
}

/// Event loop over one child: forwards its output and tracks its status
/// until stdout, stderr and the process itself are all done.
pub struct Supervisor<E, O, W> {
	endpoints: E,
	stdout: O,
	stderr: W,
	state: SupervisionState,
	buf: Vec<u8>,
	final_drain_limit: usize,
	/// Sinks whose reader went away; their bytes are drained and dropped.
	sink_closed: [bool; 2],
	report: RunReport,
}

impl<E: Endpoints, O: Write, W: Write> Supervisor<E, O, W> {
	pub fn new(endpoints: E, config: &SupervisorConfig, stdout: O, stderr: W) -> Self {
		let report = RunReport {
			pid: endpoints.child_pid(),
			..RunReport::default()
		};
		Self {
			endpoints,
			stdout,
			stderr,
			state: SupervisionState::default(),
			buf: vec![0u8; config.read_buffer_size.max(1)],
			final_drain_limit: config.final_drain_limit,
			sink_closed: [false; 2],
			report,
		}
	}

	pub fn state(&self) -> SupervisionState {
		self.state
	}

	pub fn report(&self) -> &RunReport {
		&self.report
	}

	/// Runs until nothing is pending or a quit signal arrives, then releases
	/// every remaining descriptor.
	pub fn run(mut self) -> Result<RunReport> {
		let quit = self.event_loop()?;
		self.report.quit = quit;
		self.cleanup()?;
		Ok(self.report)
	}

	fn event_loop(&mut self) -> Result<bool> {
		while self.state.is_running() {
			tracing::debug!(waiting_for = %self.state, "waiting for events");
			let events = self.endpoints.wait()?;
			tracing::trace!(count = events.len(), "poller returned");
			for event in events {
				if self.dispatch(event)? == Flow::Quit {
					return Ok(true);
				}
			}
		}
		Ok(false)
	}

	/// Applies one readiness event.
	pub fn dispatch(&mut self, event: ReadinessEvent) -> Result<Flow> {
		match event.source {
			Source::Signals if event.readiness.readable => self.on_signal(),
			Source::Signals => {
				tracing::debug!(readiness = ?event.readiness, "signal channel not readable");
				Ok(Flow::Continue)
			}
			Source::Capture(stream) => {
				self.on_capture(stream, event.readiness)?;
				Ok(Flow::Continue)
			}
		}
	}

	fn on_signal(&mut self) -> Result<Flow> {
		let record = self.endpoints.read_signal()?;
		match record.kind {
			Some(SignalKind::Interrupt) => {
				tracing::info!(from = record.sender_pid, "interrupt received, ignoring");
			}
			Some(SignalKind::Quit) => {
				tracing::info!(from = record.sender_pid, "quit received, leaving event loop");
				return Ok(Flow::Quit);
			}
			Some(SignalKind::ChildStatus) if self.state.process_pending => {
				self.on_child_status()?;
			}
			Some(SignalKind::ChildStatus) => {
				tracing::debug!("child status change after reap, ignoring");
			}
			Some(SignalKind::BrokenPipe) => {
				tracing::info!("broken pipe received, ignoring");
			}
			None => {
				tracing::warn!(signo = record.signo, "unexpected signal");
			}
		}
		Ok(Flow::Continue)
	}

	fn on_child_status(&mut self) -> Result<()> {
		// Notifications coalesce: query until nothing is left or the child is gone.
		loop {
			let outcome = match self.endpoints.reap()? {
				Reaped::NotReadyYet => {
					tracing::debug!("child status not ready");
					return Ok(());
				}
				Reaped::Outcome(outcome) => outcome,
			};
			match outcome {
				ChildOutcome::Exited { code } => tracing::info!(code, "child exited normally"),
				ChildOutcome::Signaled { signal, core_dumped } => {
					tracing::info!(signal, core_dumped, "child was killed by signal")
				}
				ChildOutcome::Stopped { signal } => tracing::info!(signal, "child was stopped"),
				ChildOutcome::Continued => tracing::info!("child was continued"),
				ChildOutcome::Trapped => tracing::info!("child was trapped"),
			}
			if !outcome.is_terminal() {
				continue;
			}

			self.report.outcome = Some(outcome);
			self.state.process_pending = false;
			if let ChildOutcome::Exited { .. } = outcome {
				// Descendants may still hold the write ends open. The direct
				// child is gone, so flush what is buffered and stop waiting.
				for stream in Stream::ALL {
					if self.state.stream_pending(stream) {
						self.flush_remaining(stream)?;
						self.close_stream(stream)?;
					}
				}
			}
			return Ok(());
		}
	}

	fn on_capture(&mut self, stream: Stream, readiness: Readiness) -> Result<()> {
		if !self.state.stream_pending(stream) {
			tracing::trace!(stream = stream.name(), "event for closed channel, ignoring");
			return Ok(());
		}
		if readiness.readable {
			match self.forward_once(stream)? {
				Drained::Eof => return self.close_stream(stream),
				// Bytes may remain behind a hang-up; the next wait reports them.
				Drained::Data(_) => return Ok(()),
				Drained::WouldBlock => {}
			}
		}
		if readiness.remote_closed || readiness.error {
			self.close_stream(stream)?;
		}
		Ok(())
	}

	fn forward_once(&mut self, stream: Stream) -> Result<Drained> {
		let drained = self.endpoints.drain(stream, &mut self.buf)?;
		let Drained::Data(n) = drained else {
			return Ok(drained);
		};
		if self.sink_closed[stream.index()] {
			tracing::trace!(stream = stream.name(), bytes = n, "sink closed, dropped");
			return Ok(drained);
		}

		let data = &self.buf[..n];
		let written = match stream {
			Stream::Stdout => output::forward(&mut self.stdout, data, stream),
			Stream::Stderr => output::forward(&mut self.stderr, data, stream),
		};
		match written {
			Ok(()) => {
				match stream {
					Stream::Stdout => self.report.stdout_bytes += n as u64,
					Stream::Stderr => self.report.stderr_bytes += n as u64,
				}
				tracing::trace!(stream = stream.name(), bytes = n, "forwarded");
			}
			// The child keeps writing into its pipe; drain it so it never blocks.
			Err(e) if e.is_broken_pipe() => {
				tracing::warn!(stream = stream.name(), "sink closed (broken pipe), discarding further output");
				self.sink_closed[stream.index()] = true;
			}
			Err(e) => return Err(e),
		}
		Ok(drained)
	}

	fn flush_remaining(&mut self, stream: Stream) -> Result<()> {
		let mut flushed = 0;
		while flushed < self.final_drain_limit {
			match self.forward_once(stream)? {
				Drained::Data(n) => flushed += n,
				Drained::Eof | Drained::WouldBlock => break,
			}
		}
		tracing::debug!(stream = stream.name(), bytes = flushed, "flushed after exit");
		Ok(())
	}

	fn close_stream(&mut self, stream: Stream) -> Result<()> {
		if !self.state.stream_pending(stream) {
			return Ok(());
		}
		self.endpoints.close(stream)?;
		self.state.clear_stream(stream);
		tracing::debug!(stream = stream.name(), "capture channel closed");
		Ok(())
	}

	fn cleanup(&mut self) -> Result<()> {
		for stream in Stream::ALL {
			self.close_stream(stream)?;
		}
		self.endpoints.shutdown()
	}
}
