use std::sync::LazyLock;

/// The publicly visible name of the server
pub const PKG_NAME: &str = "graphwrite";

/// The version of the server
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The short description shown in the command line help
pub const INFO: &str = "
The graphwrite write path node.

Resolves GraphQL mutations against the graph backend, and keeps replicas in
step by exchanging committed key-value batches over a log bus.
";

/// The log level used when none is given on the command line (defaults to info)
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// How many worker threads the runtime starts (defaults to the number of cpus)
pub static RUNTIME_WORKER_THREADS: LazyLock<usize> =
	graphwrite_core::lazy_env_parse!("GRAPHWRITE_RUNTIME_WORKER_THREADS", usize, || {
		num_cpus::get().max(1)
	});
