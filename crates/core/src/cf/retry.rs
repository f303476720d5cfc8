use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::cnf::{BROKER_CONNECT_ATTEMPTS, BROKER_CONNECT_DELAY_SECS};
use crate::err::Error;

const TARGET: &str = "graphwrite::cf";

/// How the delay between attempts changes as attempts fail.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backoff {
	/// Wait the same delay between every attempt
	Fixed,
	/// Double the delay after every attempt, up to a maximum
	Exponential {
		max: Duration,
		/// Randomise each delay between half and all of its length
		jitter: bool,
	},
}

/// A bounded retry policy for constructing log bus clients.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
	/// The total number of attempts, including the first one
	pub attempts: u32,
	/// The delay after the first failed attempt
	pub delay: Duration,
	pub backoff: Backoff,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			attempts: *BROKER_CONNECT_ATTEMPTS,
			delay: Duration::from_secs(*BROKER_CONNECT_DELAY_SECS),
			backoff: Backoff::Fixed,
		}
	}
}

impl RetryPolicy {
	pub fn fixed(attempts: u32, delay: Duration) -> Self {
		Self {
			attempts,
			delay,
			backoff: Backoff::Fixed,
		}
	}

	pub fn with_backoff(mut self, backoff: Backoff) -> Self {
		self.backoff = backoff;
		self
	}

	/// The delay to wait after the given failed attempt, counting from one
	pub fn delay_for(&self, attempt: u32) -> Duration {
		match self.backoff {
			Backoff::Fixed => self.delay,
			Backoff::Exponential {
				max,
				jitter,
			} => {
				let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
				let delay = self.delay.saturating_mul(factor).min(max);
				if jitter && !delay.is_zero() {
					let millis = delay.as_millis() as u64;
					Duration::from_millis(rand::thread_rng().gen_range(millis / 2..=millis))
				} else {
					delay
				}
			}
		}
	}

	/// Run a fallible construction until it succeeds or the attempts run out.
	///
	/// Failures are logged. There is no delay after the final attempt. Once
	/// every attempt has failed, [`Error::BrokerUnavailable`] is returned with
	/// the last failure. If the canceller fires while waiting between attempts,
	/// [`Error::Shutdown`] is returned.
	pub async fn run<T, F, Fut>(
		&self,
		canceller: &CancellationToken,
		what: impl fmt::Display,
		mut f: F,
	) -> Result<T, Error>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, Error>>,
	{
		let attempts = self.attempts.max(1);
		let mut attempt = 0;
		loop {
			attempt += 1;
			let err = match f().await {
				Ok(v) => return Ok(v),
				Err(e) => e,
			};
			if attempt >= attempts {
				return Err(Error::BrokerUnavailable {
					attempts,
					message: err.to_string(),
				});
			}
			let delay = self.delay_for(attempt);
			error!(
				target: TARGET,
				attempt,
				attempts,
				"Unable to create {what}: {err}, will retry in {}ms",
				delay.as_millis()
			);
			tokio::select! {
				biased;
				_ = canceller.cancelled() => return Err(Error::Shutdown),
				_ = tokio::time::sleep(delay) => {}
			}
		}
	}
}
