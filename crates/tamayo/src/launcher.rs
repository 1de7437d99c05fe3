use std::ffi::CString;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::libc;
use nix::sys::signal::{signal, SigHandler, SigSet, Signal};
use nix::unistd::{dup2, execvp, fork, ForkResult};

use crate::error::{Error, Result};
use crate::types::ChildHandle;

/// Runs when no program was given.
pub const FALLBACK_COMMAND: [&str; 2] = ["echo", "usage: tamayo PROG [ARGS]"];

/// Exit status of a child whose `execvp` failed.
pub const EXEC_FAILED: i32 = 127;

/// Program and argv, converted ahead of the fork.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
	argv: Vec<CString>,
	fallback: bool,
	failure_message: Vec<u8>,
}

impl LaunchSpec {
	pub fn new<S: AsRef<str>>(argv: &[S]) -> Result<Self> {
		let fallback = argv.is_empty();
		let words: Vec<&str> = if fallback {
			FALLBACK_COMMAND.to_vec()
		} else {
			argv.iter().map(|s| s.as_ref()).collect()
		};

		let argv = words
			.iter()
			.map(|w| {
				CString::new(*w).map_err(|_| Error::Launch {
					op: "argv",
					reason: format!("argument contains a NUL byte: {:?}", w),
				})
			})
			.collect::<Result<Vec<_>>>()?;

		let failure_message = format!("tamayo: failed to execute {}\n", words[0]).into_bytes();
		Ok(Self {
			argv,
			fallback,
			failure_message,
		})
	}

	pub fn program(&self) -> &str {
		self.argv[0].to_str().unwrap_or("?")
	}

	pub fn is_fallback(&self) -> bool {
		self.fallback
	}

	pub fn display(&self) -> String {
		self.argv
			.iter()
			.map(|a| a.to_string_lossy())
			.collect::<Vec<_>>()
			.join(" ")
	}
}

/// Forks and executes `spec` with fd 1 and fd 2 on the given write ends.
///
/// The parent's copies of both write ends are closed before returning, so
/// hang-up on the read ends is observable once the child side closes.
pub fn launch(spec: &LaunchSpec, stdout: OwnedFd, stderr: OwnedFd) -> Result<ChildHandle> {
	// SAFETY: the child only calls async-signal-safe functions before exec.
	match unsafe { fork() } {
		Ok(ForkResult::Child) => exec_child(spec, &stdout, &stderr),
		Ok(ForkResult::Parent { child }) => {
			for (name, fd) in [("stdout write end", stdout), ("stderr write end", stderr)] {
				nix::unistd::close(fd.into_raw_fd()).map_err(|e| Error::Launch {
					op: name,
					reason: e.to_string(),
				})?;
			}
			tracing::info!(pid = child.as_raw(), command = %spec.display(), "child launched");
			Ok(ChildHandle { pid: child })
		}
		Err(e) => Err(Error::Launch {
			op: "fork",
			reason: e.to_string(),
		}),
	}
}

fn exec_child(spec: &LaunchSpec, stdout: &OwnedFd, stderr: &OwnedFd) -> ! {
	// The supervisor's mask and ignored SIGPIPE must not leak into the program.
	let _ = SigSet::empty().thread_set_mask();
	// SAFETY: restoring the default disposition installs no handler.
	let _ = unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) };

	if redirect(stdout.as_raw_fd(), stderr.as_raw_fd()).is_ok() {
		let _ = execvp(&spec.argv[0], &spec.argv);
	}

	let msg = &spec.failure_message;
	// SAFETY: write(2) and _exit(2) are async-signal-safe; msg outlives the call.
	unsafe {
		libc::write(libc::STDERR_FILENO, msg.as_ptr().cast(), msg.len());
		libc::_exit(EXEC_FAILED)
	}
}

/// Puts the write ends on fd 1 and fd 2.
///
/// Either end may itself sit on 0, 1 or 2 when the supervisor was started
/// with standard descriptors closed. Both are first lifted above 2 so one
/// `dup2` never clobbers the other end.
fn redirect(stdout: RawFd, stderr: RawFd) -> nix::Result<()> {
	let stdout = lift_above_std(stdout)?;
	let stderr = lift_above_std(stderr)?;
	dup_onto(stdout, libc::STDOUT_FILENO)?;
	dup_onto(stderr, libc::STDERR_FILENO)
}

fn lift_above_std(fd: RawFd) -> nix::Result<RawFd> {
	if fd > libc::STDERR_FILENO {
		return Ok(fd);
	}
	fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(libc::STDERR_FILENO + 1))
}

/// `dup2` onto `target`, leaving it inheritable across exec.
fn dup_onto(fd: RawFd, target: RawFd) -> nix::Result<()> {
	if fd == target {
		// dup2 is a no-op here and would leave close-on-exec set.
		fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))?;
	} else {
		dup2(fd, target)?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use nix::unistd::{close, pipe2};
	use nix::fcntl::OFlag;

	fn cloexec(fd: RawFd) -> bool {
		let flags = fcntl(fd, FcntlArg::F_GETFD).unwrap();
		FdFlag::from_bits_truncate(flags).contains(FdFlag::FD_CLOEXEC)
	}

	#[test]
	fn empty_argv_uses_the_fallback() {
		let spec = LaunchSpec::new::<&str>(&[]).unwrap();
		assert!(spec.is_fallback());
		assert_eq!(spec.program(), "echo");
		assert_eq!(spec.display(), "echo usage: tamayo PROG [ARGS]");
	}

	#[test]
	fn argv_is_kept_in_order() {
		let spec = LaunchSpec::new(&["sh", "-c", "exit 3"]).unwrap();
		assert!(!spec.is_fallback());
		assert_eq!(spec.program(), "sh");
		assert_eq!(spec.display(), "sh -c exit 3");
	}

	// --- Descriptor placement ---

	#[test]
	fn low_descriptors_are_lifted_above_stderr() {
		// Any open standard slot stands in for a write end that landed there.
		let low = (0..=libc::STDERR_FILENO).find(|fd| fcntl(*fd, FcntlArg::F_GETFD).is_ok());
		if let Some(low) = low {
			let lifted = lift_above_std(low).unwrap();
			assert!(lifted > libc::STDERR_FILENO);
			assert!(cloexec(lifted));
			close(lifted).unwrap();
		}

		let (r, w) = pipe2(OFlag::O_CLOEXEC).unwrap();
		assert_eq!(lift_above_std(w.as_raw_fd()).unwrap(), w.as_raw_fd());
		drop((r, w));
	}

	#[test]
	fn dup_onto_itself_clears_close_on_exec() {
		let (r, w) = pipe2(OFlag::O_CLOEXEC).unwrap();
		assert!(cloexec(w.as_raw_fd()));
		dup_onto(w.as_raw_fd(), w.as_raw_fd()).unwrap();
		assert!(!cloexec(w.as_raw_fd()));
		drop((r, w));
	}

	#[test]
	fn dup_onto_another_slot_is_inheritable() {
		let (r, w) = pipe2(OFlag::O_CLOEXEC).unwrap();
		let (target_r, target_w) = pipe2(OFlag::O_CLOEXEC).unwrap();
		let target = target_w.into_raw_fd();
		dup_onto(w.as_raw_fd(), target).unwrap();
		assert!(!cloexec(target));
		close(target).unwrap();
		drop((r, w, target_r));
	}

	#[test]
	fn nul_byte_is_a_launch_error() {
		let err = LaunchSpec::new(&["echo", "a\0b"]).unwrap_err();
		assert!(matches!(err, Error::Launch { op: "argv", .. }), "{}", err);
	}
}
