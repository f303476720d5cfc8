#![cfg(feature = "kv-mem")]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cf::{KvBatch, KvRecord};
use crate::err::Error;
use crate::kvs::{BatchHandler, Key, Loader as LoaderTrait, Store, Subscription, Val, Version};

const TARGET: &str = "graphwrite::kvs";

/// How many committed batches a slow subscriber may fall behind by before
/// commits wait for it to catch up
const FEED_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
struct Entry {
	value: Val,
	version: Version,
	user_meta: u8,
	expires_at: u64,
}

struct Inner {
	data: RwLock<BTreeMap<Key, Entry>>,
	feeds: Mutex<Vec<mpsc::Sender<KvBatch>>>,
	// Serialises commits, so every subscriber sees them in the same order
	commit: tokio::sync::Mutex<()>,
}

/// An in-memory ordered key-value store.
///
/// Batches committed with [`Datastore::commit`] are delivered to subscribers.
/// Batches applied through a [`Loader`] are not, so a node which consumes
/// replicated batches never publishes them back onto the log bus.
#[derive(Clone)]
pub struct Datastore {
	inner: Arc<Inner>,
}

impl Default for Datastore {
	fn default() -> Self {
		Self::new()
	}
}

impl Datastore {
	/// Open a new database
	pub fn new() -> Self {
		Self {
			inner: Arc::new(Inner {
				data: RwLock::new(BTreeMap::new()),
				feeds: Mutex::new(Vec::new()),
				commit: tokio::sync::Mutex::new(()),
			}),
		}
	}

	/// Commit a batch of records, and hand it to every subscriber.
	///
	/// This waits while any subscriber is too far behind, so that no
	/// subscriber ever misses a committed batch.
	pub async fn commit(&self, batch: KvBatch) {
		let _guard = self.inner.commit.lock().await;
		self.apply(&batch.kv);
		let feeds = self.inner.feeds.lock().clone();
		for feed in feeds.iter() {
			// Sending only fails once the subscription has ended
			if feed.send(batch.clone()).await.is_err() {
				trace!(target: TARGET, "Skipping an ended subscription");
			}
		}
		self.inner.feeds.lock().retain(|f| !f.is_closed());
	}

	/// Fetch the current value of a key, ignoring expired records
	pub fn get(&self, key: &[u8]) -> Option<Val> {
		let data = self.inner.data.read();
		let entry = data.get(key)?;
		if entry.expires_at != 0 && entry.expires_at <= now() {
			return None;
		}
		Some(entry.value.clone())
	}

	/// Fetch the version a key was last written at
	pub fn version(&self, key: &[u8]) -> Option<Version> {
		self.inner.data.read().get(key).map(|e| e.version)
	}

	/// Fetch the user metadata a key was last written with
	pub fn user_meta(&self, key: &[u8]) -> Option<u8> {
		self.inner.data.read().get(key).map(|e| e.user_meta)
	}

	/// The number of active subscriptions
	pub fn subscribers(&self) -> usize {
		self.inner.feeds.lock().iter().filter(|f| !f.is_closed()).count()
	}

	pub fn len(&self) -> usize {
		self.inner.data.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.data.read().is_empty()
	}

	/// Every key and value currently stored, in key order
	pub fn snapshot(&self) -> Vec<(Key, Val)> {
		self.inner.data.read().iter().map(|(k, e)| (k.clone(), e.value.clone())).collect()
	}

	fn apply(&self, records: &[KvRecord]) {
		let mut data = self.inner.data.write();
		for record in records {
			if record.deleted {
				data.remove(&record.key);
			} else {
				data.insert(
					record.key.clone(),
					Entry {
						value: record.value.clone(),
						version: record.version,
						user_meta: record.user_meta,
						expires_at: record.expires_at,
					},
				);
			}
		}
	}
}

fn now() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}

impl Store for Datastore {
	fn new_loader(&self, parallelism: usize) -> Box<dyn LoaderTrait> {
		Box::new(Loader {
			ds: self.clone(),
			parallelism,
			pending: Vec::new(),
			done: false,
		})
	}

	fn subscribe(
		&self,
		canceller: CancellationToken,
		handler: Arc<dyn BatchHandler>,
		matches: Vec<Key>,
	) -> Result<Subscription, Error> {
		let (tx, mut rx) = mpsc::channel(FEED_CAPACITY);
		self.inner.feeds.lock().push(tx);
		Ok(Box::pin(async move {
			loop {
				let batch = tokio::select! {
					biased;
					_ = canceller.cancelled() => break,
					batch = rx.recv() => match batch {
						Some(batch) => batch,
						None => break,
					},
				};
				let batch = super::filter(batch, &matches);
				if batch.is_empty() {
					continue;
				}
				if let Err(e) = handler.handle(batch).await {
					error!(target: TARGET, "Subscription handler failed: {e}");
				}
			}
			trace!(target: TARGET, "Subscription ended");
			Ok(())
		}))
	}
}

/// Loads records into a [`Datastore`] in a single write.
pub struct Loader {
	ds: Datastore,
	parallelism: usize,
	pending: Vec<KvRecord>,
	done: bool,
}

#[async_trait]
impl LoaderTrait for Loader {
	fn set(&mut self, record: KvRecord) -> Result<(), Error> {
		if self.done {
			return Err(Error::Ds("the loader has already finished".into()));
		}
		self.pending.push(record);
		Ok(())
	}

	async fn finish(&mut self) -> Result<(), Error> {
		if self.done {
			return Ok(());
		}
		self.done = true;
		let records = std::mem::take(&mut self.pending);
		trace!(
			target: TARGET,
			records = records.len(),
			parallelism = self.parallelism,
			"Finishing load"
		);
		self.ds.apply(&records);
		Ok(())
	}
}
