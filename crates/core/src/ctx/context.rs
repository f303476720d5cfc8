use std::fmt::{self, Debug};
use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::ctx::canceller::Canceller;
use crate::ctx::reason::Reason;
use crate::err::Error;

/// The context which a single request runs within.
///
/// A context carries an optional deadline and a cancellation signal. Contexts
/// created from a parent with [`Context::new`] are cancelled whenever their
/// parent is cancelled, and inherit the parent's deadline.
#[derive(Clone)]
pub struct Context {
	// An optional deadline.
	deadline: Option<Instant>,
	// Whether or not this context is cancelled.
	cancelled: CancellationToken,
}

impl Default for Context {
	fn default() -> Self {
		Context::background()
	}
}

impl Debug for Context {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("Context")
			.field("deadline", &self.deadline)
			.field("cancelled", &self.cancelled.is_cancelled())
			.finish()
	}
}

impl Context {
	/// Creates a new empty background context.
	pub fn background() -> Self {
		Self {
			deadline: None,
			cancelled: CancellationToken::new(),
		}
	}

	/// Creates a new context from a parent context.
	pub fn new(parent: &Context) -> Self {
		Self {
			deadline: parent.deadline,
			cancelled: parent.cancelled.child_token(),
		}
	}

	/// Add cancellation to the context. The value that is returned will cancel
	/// the context and it's children once called.
	pub fn add_cancel(&mut self) -> Canceller {
		Canceller::new(self.cancelled.clone())
	}

	/// Add a deadline to the context. If the current deadline is sooner than
	/// the provided deadline, this method does nothing.
	pub fn add_deadline(&mut self, deadline: Instant) {
		match self.deadline {
			Some(current) if current < deadline => (),
			_ => self.deadline = Some(deadline),
		}
	}

	/// Add a timeout to the context. If the current timeout is sooner than
	/// the provided timeout, this method does nothing. If the result of the
	/// addition causes an overflow, this method returns an error.
	pub fn add_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
		match Instant::now().checked_add(timeout) {
			Some(deadline) => {
				self.add_deadline(deadline);
				Ok(())
			}
			None => Err(Error::InvalidTimeout(timeout.as_secs())),
		}
	}

	/// Get the timeout for this operation, if any.
	pub fn timeout(&self) -> Option<Duration> {
		self.deadline.map(|v| v.saturating_duration_since(Instant::now()))
	}

	/// Check if the context is done. If it returns `None` the operation may
	/// proceed, otherwise the operation should be stopped.
	pub fn done(&self) -> Option<Reason> {
		match self.deadline {
			Some(deadline) if deadline <= Instant::now() => Some(Reason::DeadlineExceeded),
			_ if self.cancelled.is_cancelled() => Some(Reason::Cancelled),
			_ => None,
		}
	}

	/// Check if the context is ok to continue.
	pub fn is_ok(&self) -> bool {
		self.done().is_none()
	}

	/// Check if the context is not ok to continue.
	pub fn is_done(&self) -> bool {
		self.done().is_some()
	}

	/// Drive a future to completion, unless this context is cancelled or its
	/// deadline passes first. In that case the future is dropped, aborting
	/// whatever call was outstanding, and the cancellation reason is returned
	/// as the error.
	pub async fn run<F, T>(&self, fut: F) -> anyhow::Result<T>
	where
		F: Future<Output = anyhow::Result<T>>,
	{
		if let Some(reason) = self.done() {
			return Err(Error::from(reason).into());
		}
		let deadline = async {
			match self.deadline {
				Some(deadline) => sleep_until(deadline).await,
				None => std::future::pending::<()>().await,
			}
		};
		tokio::select! {
			biased;
			_ = self.cancelled.cancelled() => Err(Error::from(Reason::Cancelled).into()),
			_ = deadline => Err(Error::from(Reason::DeadlineExceeded).into()),
			res = fut => res,
		}
	}
}
