mod start;
pub(crate) mod validator;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::cnf::{INFO, PKG_VERSION};
use crate::err::Error;

#[derive(Parser, Debug)]
#[command(name = "graphwrite command-line interface and server", bin_name = "graphwrite")]
#[command(version = PKG_VERSION, about = INFO)]
#[command(arg_required_else_help = true)]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	#[command(about = "Start the write path node")]
	Start(start::StartCommandArguments),
}

pub async fn init() -> ExitCode {
	// Parse the command line arguments
	let args = Cli::parse();
	// Run the requested command
	let output = match args.command {
		Commands::Start(args) => start::init(args).await,
	};
	// Error and exit the program
	if let Err(e) = output {
		match e {
			// There is no logger to write to
			Error::Logger(_) => eprintln!("{e}"),
			e => error!("{}", e),
		}
		ExitCode::FAILURE
	} else {
		ExitCode::SUCCESS
	}
}
