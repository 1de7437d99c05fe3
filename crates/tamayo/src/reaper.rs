use nix::errno::Errno;
use nix::sys::wait::{waitid, Id, WaitPidFlag, WaitStatus};

use crate::error::{Error, Result};
use crate::types::{ChildHandle, ChildOutcome, Reaped};

/// Non-blocking status query for the supervised child.
///
/// Reports exit, death by signal, stop and continue. Never suspends.
pub fn reap(child: ChildHandle) -> Result<Reaped> {
	let flags = WaitPidFlag::WEXITED | WaitPidFlag::WSTOPPED | WaitPidFlag::WCONTINUED | WaitPidFlag::WNOHANG;
	match waitid(Id::Pid(child.pid), flags) {
		Ok(status) => classify(status),
		// nix rejects an unknown si_code or signal number with EINVAL
		Err(Errno::EINVAL) => Err(Error::Reap(format!(
			"unrecognized status change for pid {}",
			child.pid
		))),
		Err(e) => Err(Error::Reap(format!("waitid(pid {}): {}", child.pid, e))),
	}
}

pub fn classify(status: WaitStatus) -> Result<Reaped> {
	let outcome = match status {
		WaitStatus::StillAlive => return Ok(Reaped::NotReadyYet),
		WaitStatus::Exited(_, code) => ChildOutcome::Exited { code },
		WaitStatus::Signaled(_, signal, core_dumped) => ChildOutcome::Signaled {
			signal: signal as i32,
			core_dumped,
		},
		WaitStatus::Stopped(_, signal) => ChildOutcome::Stopped { signal: signal as i32 },
		WaitStatus::Continued(_) => ChildOutcome::Continued,
		#[cfg(any(target_os = "linux", target_os = "android"))]
		WaitStatus::PtraceEvent(..) | WaitStatus::PtraceSyscall(_) => ChildOutcome::Trapped,
		#[allow(unreachable_patterns)]
		other => return Err(Error::Reap(format!("unrecognized wait status {:?}", other))),
	};
	Ok(Reaped::Outcome(outcome))
}
