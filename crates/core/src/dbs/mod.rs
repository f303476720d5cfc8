//! The explicit process state of a running node.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bus::Connector;
use crate::cf;
use crate::err::Error;
use crate::kvs::Store;
use crate::options::CdcOptions;

mod tasks;

pub use self::tasks::{Task, Tasks};

const TARGET: &str = "graphwrite::dbs";

/// Where a node is in its lifecycle
enum Lifecycle {
	Idle,
	Starting,
	Running(Tasks),
	Stopped,
}

/// A node of the write path.
///
/// A node owns the storage and log bus handles used by replication. It is
/// created once at startup, started, and shut down explicitly.
pub struct Node {
	store: Arc<dyn Store>,
	connector: Arc<dyn Connector>,
	options: CdcOptions,
	canceller: CancellationToken,
	state: Mutex<Lifecycle>,
}

impl Node {
	pub fn new(store: Arc<dyn Store>, connector: Arc<dyn Connector>, options: CdcOptions) -> Self {
		Self {
			store,
			connector,
			options,
			canceller: CancellationToken::new(),
			state: Mutex::new(Lifecycle::Idle),
		}
	}

	pub fn store(&self) -> &Arc<dyn Store> {
		&self.store
	}

	pub fn options(&self) -> &CdcOptions {
		&self.options
	}

	/// A token which is cancelled when the node shuts down
	pub fn canceller(&self) -> CancellationToken {
		self.canceller.clone()
	}

	/// Start the replication pipelines.
	///
	/// The consumer is started first, and this returns once it has joined its
	/// group. An error means the node cannot ingest replicated batches, and
	/// must not carry on. The producer is started second, and a failure there
	/// only disables replication. A node can only be started once, and a node
	/// which is shut down while starting stops its pipelines again.
	#[instrument(level = "trace", target = "graphwrite::dbs", skip_all)]
	pub async fn start(&self) -> Result<(), Error> {
		{
			let mut state = self.state.lock();
			match *state {
				Lifecycle::Idle => *state = Lifecycle::Starting,
				Lifecycle::Stopped => return Err(Error::Shutdown),
				_ => fail!("The node has already been started"),
			}
		}
		let tasks = match self.start_pipelines().await {
			Ok(tasks) => tasks,
			Err(e) => {
				let mut state = self.state.lock();
				if matches!(*state, Lifecycle::Starting) {
					*state = Lifecycle::Idle;
				}
				return Err(e);
			}
		};
		let len = tasks.len();
		// Shutdown may have been called while the pipelines were starting
		let orphaned = {
			let mut state = self.state.lock();
			if matches!(*state, Lifecycle::Starting) {
				*state = Lifecycle::Running(tasks);
				None
			} else {
				Some(tasks)
			}
		};
		if let Some(tasks) = orphaned {
			debug!(target: TARGET, tasks = len, "Node shut down while starting");
			tasks.resolve().await;
			return Err(Error::Shutdown);
		}
		debug!(target: TARGET, tasks = len, "Node started");
		Ok(())
	}

	async fn start_pipelines(&self) -> Result<Tasks, Error> {
		let mut tasks = Tasks::new();
		let consumer = cf::start_consuming(
			self.store.clone(),
			self.connector.clone(),
			&self.options,
			self.canceller.clone(),
		)
		.await?;
		if let Some(consumer) = consumer {
			tasks.push(consumer.into_task());
		}
		let producer = cf::start_producing(
			self.store.clone(),
			self.connector.clone(),
			&self.options,
			self.canceller.clone(),
		)
		.await;
		tasks.extend(producer);
		Ok(tasks)
	}

	/// Stop the replication pipelines, waiting for any batch in flight
	pub async fn shutdown(&self) {
		self.canceller.cancel();
		let state = std::mem::replace(&mut *self.state.lock(), Lifecycle::Stopped);
		if let Lifecycle::Running(tasks) = state {
			tasks.resolve().await;
		}
		info!(target: TARGET, "Node shut down");
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use async_trait::async_trait;

	use super::*;
	use crate::bus::mem::{ADDRESS, Broker};
	use crate::bus::{self, ConsumerConfig, ProducerConfig};
	use crate::cf::test::Flaky;
	use crate::cf::{KvBatch, KvRecord, RetryPolicy};
	use crate::cnf::{CDC_CONSUMER_GROUP, CDC_TOPIC};
	use crate::kvs::mem::Datastore;

	/// A connector which joins consumer groups, but never creates producers
	struct NoProducers(bus::mem::Connector);

	#[async_trait]
	impl Connector for NoProducers {
		async fn producer(
			&self,
			_: &[String],
			_: ProducerConfig,
		) -> Result<Arc<dyn bus::Producer>, Error> {
			Err(Error::Broker("connection refused".into()))
		}

		async fn consumer_group(
			&self,
			brokers: &[String],
			group: &str,
			config: ConsumerConfig,
		) -> Result<Arc<dyn bus::ConsumerGroup>, Error> {
			self.0.consumer_group(brokers, group, config).await
		}
	}

	fn replicating(attempts: u32) -> CdcOptions {
		CdcOptions::default()
			.with_source_brokers(vec![ADDRESS.into()])
			.with_target_brokers(vec![ADDRESS.into()])
			.with_retry(RetryPolicy::fixed(attempts, Duration::from_secs(5)))
	}

	#[test_log::test(tokio::test)]
	async fn starts_without_pipelines() {
		let connector = Arc::new(Broker::new().connector());
		let node = Node::new(Arc::new(Datastore::new()), connector, CdcOptions::default());
		node.start().await.unwrap();
		assert!(node.start().await.is_err());
		node.shutdown().await;
		assert!(node.canceller().is_cancelled());
		assert!(matches!(node.start().await, Err(Error::Shutdown)));
	}

	#[test_log::test(tokio::test)]
	async fn only_one_concurrent_start_succeeds() {
		let broker = Broker::new();
		let node =
			Node::new(Arc::new(Datastore::new()), Arc::new(broker.connector()), replicating(1));
		let (a, b) = tokio::join!(node.start(), node.start());
		assert!(a.is_ok() != b.is_ok(), "{a:?} {b:?}");
		node.shutdown().await;
	}

	#[test_log::test(tokio::test(start_paused = true))]
	async fn shutdown_while_starting_stops_the_pipelines() {
		let broker = Broker::new();
		let ds = Datastore::new();
		let connector = Arc::new(NoProducers(broker.connector()));
		let node = Arc::new(Node::new(Arc::new(ds.clone()), connector, replicating(10)));
		let start = {
			let node = node.clone();
			tokio::spawn(async move { node.start().await })
		};
		// The consumer has joined, and the producer is being retried
		tokio::time::sleep(Duration::from_secs(7)).await;
		assert!(!start.is_finished());
		node.shutdown().await;
		assert!(matches!(start.await.unwrap(), Err(Error::Shutdown)));
		// The consumer exited before start returned
		let batch = KvBatch::new(vec![KvRecord::set("k", "v", 1)]);
		broker.publish(CDC_TOPIC, batch.encode().unwrap());
		tokio::time::sleep(Duration::from_secs(1)).await;
		assert_eq!(broker.committed(CDC_CONSUMER_GROUP, CDC_TOPIC), 0);
		assert!(ds.is_empty());
	}

	#[test_log::test(tokio::test(start_paused = true))]
	async fn consumer_bootstrap_failure_is_fatal() {
		let broker = Broker::new();
		let connector = Arc::new(Flaky::new(broker.connector(), 3));
		let node = Node::new(Arc::new(Datastore::new()), connector.clone(), replicating(3));
		let res = node.start().await;
		assert!(matches!(res, Err(Error::BrokerUnavailable { attempts: 3, .. })));
		// The producer is never attempted
		assert_eq!(connector.attempts(), 3);
	}

	#[test_log::test(tokio::test(start_paused = true))]
	async fn producer_bootstrap_failure_is_not_fatal() {
		let broker = Broker::new();
		let options = CdcOptions::default()
			.with_source_brokers(vec![ADDRESS.into()])
			.with_target_brokers(vec!["kafka-1:9092".into()])
			.with_retry(RetryPolicy::fixed(2, Duration::from_secs(5)));
		let node = Node::new(Arc::new(Datastore::new()), Arc::new(broker.connector()), options);
		node.start().await.unwrap();
		node.shutdown().await;
	}
}
