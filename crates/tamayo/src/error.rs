use nix::errno::Errno;
use thiserror::Error;

/// Everything that ends a supervised run early.
///
/// All variants are fatal: the core never retries.
#[derive(Error, Debug)]
pub enum Error {
	/// Signal masking, signal channel, pipe or poller creation failed.
	#[error("setup failed: {op}: {source}")]
	Setup { op: &'static str, source: Errno },

	#[error("launch failed: {op}: {reason}")]
	Launch { op: &'static str, reason: String },

	/// Reading a capture channel or the signal channel, or writing to a sink.
	#[error("io error on {what}: {source}")]
	Io {
		what: &'static str,
		source: std::io::Error,
	},

	#[error("poller failed: {op}: {source}")]
	Multiplex { op: &'static str, source: Errno },

	#[error("reap failed: {0}")]
	Reap(String),

	/// Closing a descriptor during cleanup failed.
	#[error("cleanup failed: {what}: {source}")]
	Cleanup { what: &'static str, source: Errno },

	#[error("invalid configuration: {0}")]
	Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
	pub(crate) fn setup(op: &'static str) -> impl FnOnce(Errno) -> Error {
		move |source| Error::Setup { op, source }
	}

	pub(crate) fn multiplex(op: &'static str) -> impl FnOnce(Errno) -> Error {
		move |source| Error::Multiplex { op, source }
	}

	pub(crate) fn cleanup(what: &'static str) -> impl FnOnce(Errno) -> Error {
		move |source| Error::Cleanup { what, source }
	}

	/// Whether this is a write to a pipe nobody reads any more.
	pub fn is_broken_pipe(&self) -> bool {
		matches!(self, Error::Io { source, .. } if source.kind() == std::io::ErrorKind::BrokenPipe)
	}
}
