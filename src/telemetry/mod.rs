use tracing::Subscriber;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cnf::DEFAULT_LOG_LEVEL;
use crate::err::Error;

#[derive(Default, Debug)]
pub struct Builder {
	filter: Option<EnvFilter>,
}

pub fn builder() -> Builder {
	Builder::default()
}

impl Builder {
	/// Set the log level on the builder
	pub fn with_log_level(mut self, log_level: &str) -> Self {
		match filter_from_value(log_level) {
			Ok(filter) => self.filter = Some(filter),
			Err(e) => eprintln!("Ignoring the log level `{log_level}`: {e}"),
		}
		self
	}

	/// Build a tracing dispatcher with a compact fmt subscriber writing to stderr
	pub fn build(self) -> Box<dyn Subscriber + Send + Sync + 'static> {
		let filter = match self.filter {
			Some(filter) => filter,
			None => EnvFilter::new(DEFAULT_LOG_LEVEL),
		};
		let registry = tracing_subscriber::registry().with(
			tracing_subscriber::fmt::layer()
				.compact()
				.with_ansi(true)
				.with_file(false)
				.with_target(true)
				.with_line_number(false)
				.with_thread_ids(false)
				.with_thread_names(false)
				.with_span_events(FmtSpan::NONE)
				.with_writer(std::io::stderr)
				.with_filter(filter),
		);
		Box::new(registry)
	}

	/// Install the subscriber for the whole process
	pub fn init(self) -> Result<(), Error> {
		self.build().try_init().map_err(|e| Error::Logger(e.to_string()))
	}
}

/// Build a filter from a log level or a list of filter directives.
///
/// The `debug` and `trace` levels only apply to graphwrite itself, and leave
/// every other crate at `warn`.
pub fn filter_from_value(v: &str) -> Result<EnvFilter, ParseError> {
	match v {
		// Don't show any logs at all
		"none" => EnvFilter::builder().parse("off"),
		// Otherwise, let's show only errors
		"error" => EnvFilter::builder().parse("error"),
		// Otherwise, let's show warnings and errors
		"warn" => EnvFilter::builder().parse("warn"),
		// Otherwise, let's show info and above
		"info" => EnvFilter::builder().parse("info"),
		// Otherwise, let's show debugs and above
		"debug" => EnvFilter::builder().parse("warn,graphwrite=debug,graphwrite_core=debug"),
		// Specify the log level for each code area
		"trace" => EnvFilter::builder().parse("warn,graphwrite=trace,graphwrite_core=trace"),
		// Let's try to parse the custom log level
		_ => EnvFilter::builder().parse(v),
	}
}
