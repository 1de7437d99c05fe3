use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, OwnedFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::pipe2;

use crate::error::{Error, Result};
use crate::types::{Drained, Stream};

/// One `PIPE_BUF` per readiness notification.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Default pipe capacity on Linux; bounds the flush after a normal exit.
pub const FINAL_DRAIN_LIMIT: usize = 64 * 1024;

/// Pipe carrying one of the child's output streams.
pub struct CaptureChannel;

impl CaptureChannel {
	/// Both ends are close-on-exec; the launcher duplicates the write end onto
	/// the child's standard slot, which clears the flag on the copy only.
	pub fn create(stream: Stream) -> Result<(CaptureReader, OwnedFd)> {
		let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).map_err(Error::setup("pipe2"))?;

		let flags = fcntl(read_end.as_raw_fd(), FcntlArg::F_GETFL).map_err(Error::setup("fcntl"))?;
		let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
		fcntl(read_end.as_raw_fd(), FcntlArg::F_SETFL(flags)).map_err(Error::setup("fcntl"))?;

		tracing::debug!(
			stream = stream.name(),
			read = read_end.as_raw_fd(),
			write = write_end.as_raw_fd(),
			"capture pipe open"
		);
		Ok((
			CaptureReader {
				stream,
				file: File::from(read_end),
			},
			write_end,
		))
	}
}

/// Supervisor-owned read end of a capture pipe.
pub struct CaptureReader {
	stream: Stream,
	file: File,
}

impl CaptureReader {
	pub fn stream(&self) -> Stream {
		self.stream
	}

	/// A single read of at most `buf.len()` bytes.
	pub fn drain(&mut self, buf: &mut [u8]) -> Result<Drained> {
		loop {
			match self.file.read(buf) {
				Ok(0) => return Ok(Drained::Eof),
				Ok(n) => return Ok(Drained::Data(n)),
				Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Drained::WouldBlock),
				Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
				Err(e) => {
					return Err(Error::Io {
						what: self.stream.name(),
						source: e,
					})
				}
			}
		}
	}

	pub fn close(self) -> Result<()> {
		nix::unistd::close(self.file.into_raw_fd()).map_err(Error::cleanup("capture pipe"))
	}
}

impl AsFd for CaptureReader {
	fn as_fd(&self) -> BorrowedFd<'_> {
		self.file.as_fd()
	}
}

/// Writes captured bytes to a sink as-is and flushes right away.
pub fn forward<W: Write>(sink: &mut W, data: &[u8], stream: Stream) -> Result<()> {
	sink.write_all(data)
		.and_then(|_| sink.flush())
		.map_err(|source| Error::Io {
			what: match stream {
				Stream::Stdout => "stdout sink",
				Stream::Stderr => "stderr sink",
			},
			source,
		})
}
