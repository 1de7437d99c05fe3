use clap::Parser;
use owo_colors::OwoColorize;
use tamayo::{LaunchSpec, Session, Supervisor, SupervisorConfig};
use tracing::Level;

/// Run PROG under a single-threaded epoll supervisor, forwarding its output.
///
/// SIGQUIT stops supervision immediately; SIGINT is observed and ignored.
#[derive(Debug, Parser)]
#[command(name = "tamayo", version)]
struct Cli {
	/// Log observed events to stderr (-v info, -vv debug, -vvv trace)
	#[arg(short, long, action = clap::ArgAction::Count)]
	verbose: u8,

	/// Print a JSON run report to stderr when supervision ends
	#[arg(long)]
	json: bool,

	/// Largest single read from a capture pipe, in bytes
	#[arg(long, default_value_t = tamayo::output::READ_BUFFER_SIZE)]
	buffer_size: usize,

	/// Readiness events collected per wait
	#[arg(long, default_value_t = tamayo::poller::MAX_EVENTS)]
	max_events: usize,

	/// Bytes flushed from each pipe after the child exits normally
	#[arg(long, default_value_t = tamayo::output::FINAL_DRAIN_LIMIT)]
	final_drain: usize,

	/// Program to run, followed by its arguments
	#[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "PROG [ARGS]")]
	command: Vec<String>,
}

impl Cli {
	fn config(&self) -> SupervisorConfig {
		SupervisorConfig {
			read_buffer_size: self.buffer_size,
			max_events: self.max_events,
			final_drain_limit: self.final_drain,
		}
	}

	fn log_level(&self) -> Level {
		match self.verbose {
			0 => Level::WARN,
			1 => Level::INFO,
			2 => Level::DEBUG,
			_ => Level::TRACE,
		}
	}
}

fn main() {
	let cli = Cli::parse();

	// stdout belongs to the child
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_max_level(cli.log_level())
		.with_target(false)
		.init();

	match run(&cli) {
		Ok(report) => {
			if cli.json {
				match serde_json::to_string(&report) {
					Ok(json) => eprintln!("{}", json),
					Err(e) => tracing::error!("failed to encode report: {}", e),
				}
			}
		}
		Err(e) => {
			eprintln!("{} {}", "error:".red().bold(), e);
			std::process::exit(1);
		}
	}
}

fn run(cli: &Cli) -> tamayo::Result<tamayo::RunReport> {
	let config = cli.config();
	let spec = LaunchSpec::new(&cli.command)?;
	let session = Session::start(&spec, &config)?;
	tracing::info!(pid = session.child().id(), "supervising");
	Supervisor::new(session, &config, std::io::stdout(), std::io::stderr()).run()
}
