use std::fmt;

use crate::err::Error;

/// Why a [`Context`](super::Context) stopped accepting work.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Reason {
	/// The deadline of the request passed
	DeadlineExceeded,
	/// The request was cancelled by its caller, or by a parent context
	Cancelled,
}

impl Reason {
	pub fn is_timeout(&self) -> bool {
		matches!(self, Reason::DeadlineExceeded)
	}
}

impl fmt::Display for Reason {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Reason::DeadlineExceeded => f.write_str("the request deadline passed"),
			Reason::Cancelled => f.write_str("the request was cancelled"),
		}
	}
}

impl From<Reason> for Error {
	fn from(reason: Reason) -> Self {
		match reason {
			Reason::DeadlineExceeded => Error::QueryTimedout,
			Reason::Cancelled => Error::QueryCancelled,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn maps_to_query_errors() {
		assert!(Reason::DeadlineExceeded.is_timeout());
		assert!(!Reason::Cancelled.is_timeout());
		assert!(matches!(Error::from(Reason::DeadlineExceeded), Error::QueryTimedout));
		assert!(matches!(Error::from(Reason::Cancelled), Error::QueryCancelled));
	}
}
