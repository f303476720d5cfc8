use tokio_util::sync::CancellationToken;

/// A handle which cancels the [`Context`](super::Context) it was created from,
/// along with every context derived from it.
#[derive(Clone, Debug, Default)]
pub struct Canceller {
	token: CancellationToken,
}

impl Canceller {
	pub(crate) fn new(token: CancellationToken) -> Canceller {
		Canceller {
			token,
		}
	}

	/// Cancel the context.
	pub fn cancel(&self) {
		self.token.cancel();
	}
}
