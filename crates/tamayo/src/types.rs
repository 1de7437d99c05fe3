use std::fmt;

use nix::sys::epoll::EpollFlags;
use nix::sys::signal::{SigSet, Signal};
use serde::{Deserialize, Serialize};

/// One of the child's two captured output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
	Stdout,
	Stderr,
}

impl Stream {
	pub const ALL: [Stream; 2] = [Stream::Stdout, Stream::Stderr];

	pub fn name(self) -> &'static str {
		match self {
			Stream::Stdout => "stdout",
			Stream::Stderr => "stderr",
		}
	}

	pub(crate) fn index(self) -> usize {
		match self {
			Stream::Stdout => 0,
			Stream::Stderr => 1,
		}
	}
}

/// What a registered descriptor stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
	Signals,
	Capture(Stream),
}

/// Conditions reported for one ready descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
	pub readable: bool,
	pub remote_closed: bool,
	pub error: bool,
	pub priority: bool,
}

impl Readiness {
	pub const READABLE: Readiness = Readiness {
		readable: true,
		remote_closed: false,
		error: false,
		priority: false,
	};

	pub const HANGUP: Readiness = Readiness {
		readable: false,
		remote_closed: true,
		error: false,
		priority: false,
	};

	pub const READABLE_HANGUP: Readiness = Readiness {
		readable: true,
		remote_closed: true,
		error: false,
		priority: false,
	};
}

impl From<EpollFlags> for Readiness {
	fn from(flags: EpollFlags) -> Self {
		Self {
			readable: flags.contains(EpollFlags::EPOLLIN),
			remote_closed: flags.intersects(EpollFlags::EPOLLHUP | EpollFlags::EPOLLRDHUP),
			error: flags.contains(EpollFlags::EPOLLERR),
			priority: flags.contains(EpollFlags::EPOLLPRI),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessEvent {
	pub source: Source,
	pub readiness: Readiness,
}

impl ReadinessEvent {
	pub fn new(source: Source, readiness: Readiness) -> Self {
		Self { source, readiness }
	}
}

/// The signals the supervisor takes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
	Interrupt,
	Quit,
	ChildStatus,
	BrokenPipe,
}

impl SignalKind {
	pub fn signal(self) -> Signal {
		match self {
			SignalKind::Interrupt => Signal::SIGINT,
			SignalKind::Quit => Signal::SIGQUIT,
			SignalKind::ChildStatus => Signal::SIGCHLD,
			SignalKind::BrokenPipe => Signal::SIGPIPE,
		}
	}

	pub fn from_signal(signal: Signal) -> Option<Self> {
		match signal {
			Signal::SIGINT => Some(SignalKind::Interrupt),
			Signal::SIGQUIT => Some(SignalKind::Quit),
			Signal::SIGCHLD => Some(SignalKind::ChildStatus),
			Signal::SIGPIPE => Some(SignalKind::BrokenPipe),
			_ => None,
		}
	}
}

/// Immutable set of signals routed through the signal channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalSet {
	kinds: Vec<SignalKind>,
}

impl SignalSet {
	/// Interrupt, quit, child-status-changed and broken-pipe.
	pub fn supervised() -> Self {
		Self {
			kinds: vec![
				SignalKind::Interrupt,
				SignalKind::Quit,
				SignalKind::ChildStatus,
				SignalKind::BrokenPipe,
			],
		}
	}

	pub fn contains(&self, kind: SignalKind) -> bool {
		self.kinds.contains(&kind)
	}

	pub fn kinds(&self) -> &[SignalKind] {
		&self.kinds
	}

	pub fn to_sigset(&self) -> SigSet {
		let mut set = SigSet::empty();
		for kind in &self.kinds {
			set.add(kind.signal());
		}
		set
	}
}

/// A signal read back from the signal channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalRecord {
	pub signo: i32,
	pub kind: Option<SignalKind>,
	pub sender_pid: u32,
}

impl SignalRecord {
	pub fn from_raw(signo: i32, sender_pid: u32) -> Self {
		let kind = Signal::try_from(signo).ok().and_then(SignalKind::from_signal);
		Self {
			signo,
			kind,
			sender_pid,
		}
	}

	pub fn of(kind: SignalKind) -> Self {
		Self {
			signo: kind.signal() as i32,
			kind: Some(kind),
			sender_pid: 0,
		}
	}
}

/// Pid of the launched child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildHandle {
	pub pid: nix::unistd::Pid,
}

impl ChildHandle {
	pub fn id(&self) -> u32 {
		self.pid.as_raw() as u32
	}
}

/// Classified child state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChildOutcome {
	Exited { code: i32 },
	Signaled { signal: i32, core_dumped: bool },
	Stopped { signal: i32 },
	Continued,
	Trapped,
}

impl ChildOutcome {
	/// Whether the child is gone for good.
	pub fn is_terminal(&self) -> bool {
		matches!(self, ChildOutcome::Exited { .. } | ChildOutcome::Signaled { .. })
	}
}

/// Result of one status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaped {
	Outcome(ChildOutcome),
	NotReadyYet,
}

/// Result of one bounded read from a capture channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drained {
	Data(usize),
	Eof,
	WouldBlock,
}

/// What the supervisor is still waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisionState {
	pub stdout_pending: bool,
	pub stderr_pending: bool,
	pub process_pending: bool,
}

impl Default for SupervisionState {
	fn default() -> Self {
		Self {
			stdout_pending: true,
			stderr_pending: true,
			process_pending: true,
		}
	}
}

impl SupervisionState {
	pub fn is_running(&self) -> bool {
		self.stdout_pending || self.stderr_pending || self.process_pending
	}

	pub fn stream_pending(&self, stream: Stream) -> bool {
		match stream {
			Stream::Stdout => self.stdout_pending,
			Stream::Stderr => self.stderr_pending,
		}
	}

	pub(crate) fn clear_stream(&mut self, stream: Stream) {
		match stream {
			Stream::Stdout => self.stdout_pending = false,
			Stream::Stderr => self.stderr_pending = false,
		}
	}

}

/// Lists what is still pending, e.g. `stdout stderr proc`.
impl fmt::Display for SupervisionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let names = [
			(self.stdout_pending, "stdout"),
			(self.stderr_pending, "stderr"),
			(self.process_pending, "proc"),
		];
		let mut first = true;
		for (_, name) in names.iter().filter(|(pending, _)| *pending) {
			if !first {
				f.write_str(" ")?;
			}
			f.write_str(name)?;
			first = false;
		}
		Ok(())
	}
}

/// Summary of one supervised run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
	pub pid: Option<u32>,
	pub outcome: Option<ChildOutcome>,
	pub quit: bool,
	pub stdout_bytes: u64,
	pub stderr_bytes: u64,
}
