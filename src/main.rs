//! The graphwrite server binary.
//!
//! Starts a write path node which ingests replicated key-value batches from a
//! log bus, and publishes the batches it commits locally.

#![deny(clippy::mem_forget)]

#[macro_use]
extern crate tracing;

mod cli;
mod cnf;
mod dbs;
mod err;
mod telemetry;

use std::future::Future;
use std::process::ExitCode;

fn main() -> ExitCode {
	with_runtime(cli::init())
}

/// Build the multi-threaded runtime and run the command line on it
fn with_runtime(fut: impl Future<Output = ExitCode> + Send) -> ExitCode {
	let mut b = tokio::runtime::Builder::new_multi_thread();
	b.enable_all().worker_threads(*cnf::RUNTIME_WORKER_THREADS).thread_name("graphwrite-worker");
	match b.build() {
		Ok(b) => b.block_on(fut),
		Err(e) => {
			// No subscriber is installed yet
			eprintln!("Failed to build runtime: {e}");
			ExitCode::FAILURE
		}
	}
}
