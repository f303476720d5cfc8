use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::bus::{Connector, Producer, ProducerConfig, ProducerMessage};
use crate::cf::KvBatch;
use crate::dbs::Task;
use crate::err::Error;
use crate::kvs::{BatchHandler, Store};
use crate::options::CdcOptions;

const TARGET: &str = "graphwrite::cf";

/// Publishes every batch committed to local storage onto the log bus.
///
/// Returns `None` when no target brokers are configured, or when the producer
/// could not be constructed. Replication is then disabled, and the rest of the
/// node carries on. Otherwise the returned task runs the storage subscription
/// until the canceller fires.
pub async fn start_producing(
	store: Arc<dyn Store>,
	connector: Arc<dyn Connector>,
	opts: &CdcOptions,
	canceller: CancellationToken,
) -> Option<Task> {
	info!(target: TARGET, "Target log bus brokers: {:?}", opts.target_brokers);
	if opts.target_brokers.is_empty() {
		return None;
	}
	let config = ProducerConfig {
		return_successes: true,
	};
	let producer = opts
		.retry
		.run(&canceller, "the log bus producer", || {
			connector.producer(&opts.target_brokers, config)
		})
		.await;
	let producer = match producer {
		Ok(producer) => producer,
		Err(e) if e.is_cancellation() => {
			debug!(target: TARGET, "Shutdown before the log bus producer was created");
			return None;
		}
		Err(e) => {
			error!(
				target: TARGET,
				"Unable to create the log bus producer, and will not publish updates: {e}"
			);
			return None;
		}
	};
	let publisher = Arc::new(Publisher {
		producer: producer.clone(),
		topic: opts.topic.clone(),
	});
	// Every batch committed from here on is published
	let subscription = match store.subscribe(canceller, publisher, Vec::new()) {
		Ok(subscription) => subscription,
		Err(e) => {
			error!(target: TARGET, "Error while subscribing to local storage: {e}");
			if let Err(e) = producer.close().await {
				warn!(target: TARGET, "Error closing the log bus producer: {e}");
			}
			return None;
		}
	};
	debug!(target: TARGET, "Subscribed to local storage for updates");
	Some(Box::pin(tokio::spawn(async move {
		// Runs until the canceller fires
		if let Err(e) = subscription.await {
			error!(target: TARGET, "Error while subscribed to local storage: {e}");
		}
		if let Err(e) = producer.close().await {
			warn!(target: TARGET, "Error closing the log bus producer: {e}");
		}
		trace!(target: TARGET, "Background task exited: Publishing committed batches");
	})))
}

/// Encodes and publishes each committed batch.
pub(crate) struct Publisher {
	producer: Arc<dyn Producer>,
	topic: String,
}

#[async_trait]
impl BatchHandler for Publisher {
	async fn handle(&self, batch: KvBatch) -> Result<(), Error> {
		let value = match batch.encode() {
			Ok(v) => v,
			Err(e) => {
				// The batch is already committed locally, so it is dropped
				error!(target: TARGET, "Unable to encode the committed batch: {e}");
				return Ok(());
			}
		};
		let message = ProducerMessage {
			topic: self.topic.clone(),
			value,
		};
		match self.producer.send(message).await {
			Ok((partition, offset)) => {
				debug!(
					target: TARGET,
					partition,
					offset,
					"Produced a batch with {} records",
					batch.len()
				);
			}
			Err(e) => {
				let records = batch.len();
				error!(target: TARGET, "Unable to publish a batch with {records} records: {e}");
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;
	use crate::bus::mem::Broker;
	use crate::cf::test::Flaky;
	use crate::cf::{KvRecord, RetryPolicy};
	use crate::kvs::mem::Datastore;

	const TOPIC: &str = "graphwrite-cdc";

	fn opts(attempts: u32) -> CdcOptions {
		CdcOptions::default()
			.with_target_brokers(vec!["memory".into()])
			.with_retry(RetryPolicy::fixed(attempts, Duration::from_secs(5)))
	}

	#[test_log::test(tokio::test)]
	async fn disabled_without_target_brokers() {
		let ds = Arc::new(Datastore::new());
		let broker = Broker::new();
		let connector = Arc::new(broker.connector());
		let opts = CdcOptions::default();
		let task = start_producing(ds.clone(), connector, &opts, CancellationToken::new()).await;
		assert!(task.is_none());
		assert_eq!(ds.subscribers(), 0);
	}

	#[test_log::test(tokio::test(start_paused = true))]
	async fn survives_nine_construction_failures() {
		let ds = Arc::new(Datastore::new());
		let broker = Broker::new();
		let connector = Arc::new(Flaky::new(broker.connector(), 9));
		let canceller = CancellationToken::new();
		let task =
			start_producing(ds.clone(), connector.clone(), &opts(10), canceller.clone()).await;
		assert!(task.is_some());
		assert_eq!(connector.attempts(), 10);
		canceller.cancel();
		task.unwrap().await.unwrap();
	}

	#[test_log::test(tokio::test(start_paused = true))]
	async fn disables_itself_after_ten_construction_failures() {
		let ds = Arc::new(Datastore::new());
		let broker = Broker::new();
		let connector = Arc::new(Flaky::new(broker.connector(), 10));
		let canceller = CancellationToken::new();
		let task = start_producing(ds.clone(), connector.clone(), &opts(10), canceller).await;
		assert!(task.is_none());
		assert_eq!(connector.attempts(), 10);
		assert_eq!(ds.subscribers(), 0);
		// Local commits still succeed with replication disabled
		ds.commit(KvBatch::new(vec![KvRecord::set("k", "v", 1)])).await;
		assert_eq!(ds.get(b"k"), Some(b"v".to_vec()));
		assert!(broker.messages(TOPIC).is_empty());
	}

	#[test_log::test(tokio::test)]
	async fn publishes_committed_batches() {
		let ds = Arc::new(Datastore::new());
		let broker = Broker::new();
		let canceller = CancellationToken::new();
		let connector = Arc::new(broker.connector());
		let task =
			start_producing(ds.clone(), connector, &opts(1), canceller.clone()).await.unwrap();
		// Committed straight away, before the background task has run
		let first = KvBatch::new(vec![KvRecord::set("a", "1", 1), KvRecord::set("b", "2", 1)]);
		let second = KvBatch::new(vec![KvRecord::delete("a", 2)]);
		ds.commit(first.clone()).await;
		ds.commit(second.clone()).await;
		while broker.messages(TOPIC).len() < 2 {
			tokio::task::yield_now().await;
		}
		let published: Vec<_> =
			broker.messages(TOPIC).iter().map(|m| KvBatch::decode(&m.value).unwrap()).collect();
		assert_eq!(published, vec![first, second]);
		canceller.cancel();
		task.await.unwrap();
		assert_eq!(ds.subscribers(), 0);
	}

	#[test_log::test(tokio::test(start_paused = true))]
	async fn shutdown_while_connecting_disables_publishing() {
		let ds = Arc::new(Datastore::new());
		let broker = Broker::new();
		let connector = Arc::new(Flaky::new(broker.connector(), 10));
		let canceller = CancellationToken::new();
		let task = {
			let (ds, canceller) = (ds.clone(), canceller.clone());
			tokio::spawn(async move { start_producing(ds, connector, &opts(10), canceller).await })
		};
		tokio::time::sleep(Duration::from_secs(7)).await;
		canceller.cancel();
		assert!(task.await.unwrap().is_none());
		assert_eq!(ds.subscribers(), 0);
	}

	#[test_log::test(tokio::test)]
	async fn send_failures_do_not_stop_publishing() {
		let broker = Broker::new();
		let producer = crate::bus::Connector::producer(
			&broker.connector(),
			&["memory".to_owned()],
			ProducerConfig {
				return_successes: true,
			},
		)
		.await
		.unwrap();
		producer.close().await.unwrap();
		let publisher = Publisher {
			producer,
			topic: TOPIC.to_owned(),
		};
		let res = publisher.handle(KvBatch::new(vec![KvRecord::set("k", "v", 1)])).await;
		assert!(res.is_ok());
		assert!(broker.messages(TOPIC).is_empty());
	}
}
