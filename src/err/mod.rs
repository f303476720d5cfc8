use std::io::Error as IoError;

use thiserror::Error;

/// An error raised while running the server binary
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	#[error("There was a problem with the node: {0}")]
	Node(#[from] graphwrite_core::err::Error),

	#[error("Couldn't initialise the logger: {0}")]
	Logger(String),

	#[error("There was an I/O error: {0}")]
	Io(#[from] IoError),
}
