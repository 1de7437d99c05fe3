use std::collections::HashMap;
use std::os::fd::{AsFd, AsRawFd, IntoRawFd, RawFd};

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use crate::error::{Error, Result};
use crate::types::{ReadinessEvent, Source};

/// Default number of events collected per wait.
pub const MAX_EVENTS: usize = 10;

/// Readiness conditions a registration asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
	/// Signal channel.
	Readable,
	/// Capture pipe. Hang-up and error are reported regardless.
	Capture,
}

impl Interest {
	fn flags(self) -> EpollFlags {
		match self {
			Interest::Readable => EpollFlags::EPOLLIN,
			Interest::Capture => EpollFlags::EPOLLIN | EpollFlags::EPOLLRDHUP | EpollFlags::EPOLLPRI,
		}
	}
}

/// Level-triggered epoll set with a typed registry.
///
/// The registry maps raw descriptors to what they stand for; it never owns
/// them.
pub struct Poller {
	epoll: Epoll,
	registry: HashMap<RawFd, Source>,
	events: Vec<EpollEvent>,
}

impl Poller {
	/// `max_events` is checked by [`crate::SupervisorConfig::validate`]; a zero
	/// budget makes every wait fail.
	pub fn new(max_events: usize) -> Result<Self> {
		let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(Error::setup("epoll_create1"))?;
		Ok(Self {
			epoll,
			registry: HashMap::new(),
			events: vec![EpollEvent::empty(); max_events],
		})
	}

	pub fn register<F: AsFd>(&mut self, fd: F, source: Source, interest: Interest) -> Result<()> {
		let raw = fd.as_fd().as_raw_fd();
		self.epoll
			.add(fd, EpollEvent::new(interest.flags(), raw as u64))
			.map_err(Error::multiplex("epoll_ctl add"))?;
		self.registry.insert(raw, source);
		tracing::trace!(fd = raw, ?source, "registered");
		Ok(())
	}

	pub fn unregister<F: AsFd>(&mut self, fd: F) -> Result<()> {
		let raw = fd.as_fd().as_raw_fd();
		self.epoll.delete(fd).map_err(Error::multiplex("epoll_ctl del"))?;
		self.registry.remove(&raw);
		tracing::trace!(fd = raw, "unregistered");
		Ok(())
	}

	pub fn is_registered(&self, source: Source) -> bool {
		self.registry.values().any(|s| *s == source)
	}

	/// Blocks until at least one registered descriptor is ready.
	///
	/// An interrupted wait yields an empty batch.
	pub fn wait(&mut self) -> Result<Vec<ReadinessEvent>> {
		let n = match self.epoll.wait(&mut self.events, EpollTimeout::NONE) {
			Ok(n) => n,
			Err(Errno::EINTR) => return Ok(Vec::new()),
			Err(e) => return Err(Error::multiplex("epoll_wait")(e)),
		};

		let mut ready = Vec::with_capacity(n);
		for event in &self.events[..n] {
			let raw = event.data() as RawFd;
			match self.registry.get(&raw) {
				Some(source) => ready.push(ReadinessEvent::new(*source, event.events().into())),
				None => tracing::warn!(fd = raw, events = ?event.events(), "unexpected descriptor ready"),
			}
		}
		Ok(ready)
	}

	pub fn close(self) -> Result<()> {
		nix::unistd::close(self.epoll.0.into_raw_fd()).map_err(Error::cleanup("epoll"))
	}
}
