use std::fmt;

use revision::Error as RevisionError;
use serde::Serialize;
use thiserror::Error;

/// An error originating from the graphwrite write path.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// The write path encountered unreachable logic
	#[error("The write path encountered unreachable logic: {0}")]
	Unreachable(String),

	/// There was a problem with the underlying datastore
	#[error("There was a problem with the underlying datastore: {0}")]
	Ds(String),

	/// The operation timed out
	#[error("The query was not executed because it exceeded the timeout")]
	QueryTimedout,

	/// The operation did not complete, because its context was cancelled
	#[error("The query was not executed due to a cancelled context")]
	QueryCancelled,

	/// Invalid timeout
	#[error("Invalid timeout: {0:?} seconds")]
	InvalidTimeout(u64),

	/// There was a problem communicating with the log bus
	#[error("There was a problem with the log bus: {0}")]
	Broker(String),

	/// A log bus address could not be handled by the configured connector
	#[error("Unsupported log bus address: {0}")]
	UnsupportedBroker(String),

	/// A log bus client could not be constructed within the retry budget
	#[error("Unable to connect to the log bus after {attempts} attempts: {message}")]
	BrokerUnavailable {
		attempts: u32,
		message: String,
	},

	/// The log bus client has already been closed
	#[error("The log bus client has been closed")]
	BrokerClosed,

	/// A background operation was interrupted by shutdown
	#[error("The operation was interrupted because the node is shutting down")]
	Shutdown,

	/// Represents an underlying error with versioned data encoding / decoding
	#[error("Versioned error: {0}")]
	Revision(#[from] RevisionError),
}

impl Error {
	#[track_caller]
	pub fn unreachable<T: fmt::Display>(message: T) -> Error {
		let location = std::panic::Location::caller();
		let message = format!("{}:{}: {}", location.file(), location.line(), message);
		Error::Unreachable(message)
	}

	/// Whether this error was caused by a cancelled or expired context
	pub fn is_cancellation(&self) -> bool {
		matches!(self, Error::QueryCancelled | Error::QueryTimedout | Error::Shutdown)
	}
}

impl Serialize for Error {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str(self.to_string().as_str())
	}
}
