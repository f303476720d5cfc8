use clap::Args;

use crate::cnf::{DEFAULT_LOG_LEVEL, PKG_NAME, PKG_VERSION};
use crate::dbs::{self, StartCommandCdcOptions};
use crate::err::Error;
use crate::telemetry;

#[derive(Args, Debug)]
pub struct StartCommandArguments {
	#[arg(help = "The logging level for the node")]
	#[arg(env = "GRAPHWRITE_LOG", short = 'l', long = "log")]
	#[arg(default_value = DEFAULT_LOG_LEVEL)]
	#[arg(value_parser = super::validator::log_level)]
	log: String,
	#[command(flatten)]
	#[command(next_help_heading = "Replication")]
	cdc: StartCommandCdcOptions,
}

pub async fn init(
	StartCommandArguments {
		log,
		cdc,
	}: StartCommandArguments,
) -> Result<(), Error> {
	// Initialize logging
	telemetry::builder().with_log_level(&log).init()?;
	info!("Running {PKG_NAME} {PKG_VERSION}");
	// Create the node
	let node = dbs::init(cdc);
	// Start replication, the consumer must be up before carrying on
	if let Err(e) = node.start().await {
		node.shutdown().await;
		return Err(e.into());
	}
	info!("Started the node, press CTRL-C to stop");
	// Wait for the process to be interrupted
	let signal = tokio::signal::ctrl_c().await;
	info!("Shutting down the node");
	node.shutdown().await;
	signal?;
	Ok(())
}
