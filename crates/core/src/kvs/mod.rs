//! The module defining the storage capability used by the write path.
//!
//! Replication touches storage in exactly two ways:
//! - a [`Loader`] bulk-loads the records of a batch, in order
//! - a subscription delivers every committed batch to a [`BatchHandler`]
//!
//! These capabilities can be provided by the following storage engines:
//! - `mem`: an in-memory ordered key-value map

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::cf::{KvBatch, KvRecord};
use crate::err::Error;

#[cfg(feature = "kv-mem")]
pub mod mem;

/// The key part of a key-value pair. An alias for [`Vec<u8>`].
pub type Key = Vec<u8>;

/// The value part of a key-value pair. An alias for [`Vec<u8>`].
pub type Val = Vec<u8>;

/// The Version part of a key-value pair. An alias for [`u64`].
pub type Version = u64;

/// Applies a stream of records to storage.
///
/// A loader is used by one task at a time, and is created fresh for every
/// batch. Records are applied in the order they were given.
#[async_trait]
pub trait Loader: Send {
	/// Queue a record to be applied.
	fn set(&mut self, record: KvRecord) -> Result<(), Error>;

	/// Apply every queued record, returning once they are all durable.
	async fn finish(&mut self) -> Result<(), Error>;
}

/// Receives every batch committed to storage.
#[async_trait]
pub trait BatchHandler: Send + Sync {
	async fn handle(&self, batch: KvBatch) -> Result<(), Error>;
}

/// A registered subscription, which delivers batches while it is driven
pub type Subscription = BoxFuture<'static, Result<(), Error>>;

/// A storage engine which replication can load into and subscribe to.
pub trait Store: Send + Sync {
	/// Create a bulk loader with a parallelism hint.
	fn new_loader(&self, parallelism: usize) -> Box<dyn Loader>;

	/// Register a subscription to committed batches.
	///
	/// Every batch committed after this returns is delivered to the handler,
	/// in commit order, by the returned future until the canceller fires.
	/// Only records whose key starts with one of the given prefixes are
	/// delivered. An empty list of prefixes matches every key. Errors returned
	/// by the handler are logged, and never stop the subscription.
	fn subscribe(
		&self,
		canceller: CancellationToken,
		handler: Arc<dyn BatchHandler>,
		matches: Vec<Key>,
	) -> Result<Subscription, Error>;
}

/// Keep only the records of a batch whose key starts with one of the prefixes
pub(crate) fn filter(batch: KvBatch, matches: &[Key]) -> KvBatch {
	if matches.is_empty() {
		return batch;
	}
	let kv: Vec<_> =
		batch.kv.into_iter().filter(|r| matches.iter().any(|m| r.key.starts_with(m))).collect();
	kv.into()
}
