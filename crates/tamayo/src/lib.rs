//! # tamayo
//!
//! Supervise one child process from a single thread.
//!
//! The child's stdout and stderr go through pipes, its status changes arrive
//! as `SIGCHLD` on a signalfd, and one epoll set waits on all three. Output is
//! forwarded verbatim as it arrives; the loop ends once both pipes are closed
//! and the child is reaped, or when `SIGQUIT` is received.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tamayo::{supervise, SupervisorConfig};
//!
//! let report = supervise(&["echo", "hello"], &SupervisorConfig::default()).unwrap();
//! println!("{:?}", report.outcome);
//! ```

pub mod error;
pub mod launcher;
pub mod output;
pub mod poller;
pub mod reaper;
pub mod session;
pub mod signals;
pub mod supervisor;
pub mod types;

pub use error::{Error, Result};
pub use launcher::LaunchSpec;
pub use session::Session;
pub use supervisor::{Endpoints, Flow, Supervisor, SupervisorConfig};
pub use types::*;

/// Launches `argv` (or the fallback command when empty) and supervises it,
/// forwarding its output to this process's stdout and stderr.
pub fn supervise<S: AsRef<str>>(argv: &[S], config: &SupervisorConfig) -> Result<RunReport> {
	let spec = LaunchSpec::new(argv)?;
	let session = Session::start(&spec, config)?;
	Supervisor::new(session, config, std::io::stdout(), std::io::stderr()).run()
}
