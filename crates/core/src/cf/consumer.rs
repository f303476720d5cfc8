use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::bus::{Claim, Connector, ConsumerConfig, ConsumerGroupHandler, Message, Session};
use crate::cf::KvBatch;
use crate::cnf::MIN_PROTOCOL_VERSION;
use crate::dbs::Task;
use crate::err::Error;
use crate::kvs::Store;
use crate::options::CdcOptions;

const TARGET: &str = "graphwrite::cf";

/// The membership state of this node within its consumer group.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemberState {
	/// Not part of an active session
	NotReady,
	/// A session has been set up, and claims may be consumed
	Ready,
	/// At least one claim of the current session is being consumed
	Consuming,
}

/// Loads the batches of every claim into local storage.
pub struct ConsumerHandler {
	store: Arc<dyn Store>,
	parallelism: usize,
	canceller: CancellationToken,
	// Fired by the first session set up, and never again
	ready: Mutex<Option<oneshot::Sender<()>>>,
	state: watch::Sender<MemberState>,
	generation: AtomicU64,
}

impl ConsumerHandler {
	/// Create a handler, along with the gate which opens once the first session is set up
	pub fn new(
		store: Arc<dyn Store>,
		parallelism: usize,
		canceller: CancellationToken,
	) -> (Self, oneshot::Receiver<()>) {
		let (ready, gate) = oneshot::channel();
		let handler = Self {
			store,
			parallelism,
			canceller,
			ready: Mutex::new(Some(ready)),
			state: watch::Sender::new(MemberState::NotReady),
			generation: AtomicU64::new(0),
		};
		(handler, gate)
	}

	pub fn state(&self) -> watch::Receiver<MemberState> {
		self.state.subscribe()
	}

	/// The generation of the most recent session set up
	pub fn generation(&self) -> u64 {
		self.generation.load(Ordering::Acquire)
	}

	/// Load a single message, marking it only once the load has finished
	async fn process(&self, session: &dyn Session, message: &Message) -> Result<(), Error> {
		let batch = match KvBatch::decode(&message.value) {
			Ok(batch) => batch,
			Err(e) => {
				error!(
					target: TARGET,
					offset = message.offset,
					"Error while decoding a consumed message: {e}"
				);
				return Err(e);
			}
		};
		let mut loader = self.store.new_loader(self.parallelism);
		let records = batch.len();
		for record in batch.kv {
			loader.set(record)?;
		}
		loader.finish().await?;
		debug!(
			target: TARGET,
			records,
			timestamp = ?message.timestamp,
			topic = %message.topic,
			"Message stored"
		);
		session.mark_message(message, "");
		Ok(())
	}
}

#[async_trait]
impl ConsumerGroupHandler for ConsumerHandler {
	async fn setup(&self, session: &dyn Session) -> Result<(), Error> {
		self.state.send_replace(MemberState::Ready);
		self.generation.store(session.generation_id(), Ordering::Release);
		if let Some(ready) = self.ready.lock().take() {
			// The receiver is gone once startup has stopped waiting
			let _ = ready.send(());
		}
		trace!(
			target: TARGET,
			member = session.member_id(),
			generation = session.generation_id(),
			"Session set up"
		);
		Ok(())
	}

	async fn cleanup(&self, session: &dyn Session) -> Result<(), Error> {
		self.state.send_replace(MemberState::NotReady);
		trace!(
			target: TARGET,
			member = session.member_id(),
			generation = session.generation_id(),
			"Session cleaned up"
		);
		Ok(())
	}

	async fn consume_claim(
		&self,
		session: &dyn Session,
		claim: &mut dyn Claim,
	) -> Result<(), Error> {
		self.state.send_replace(MemberState::Consuming);
		trace!(
			target: TARGET,
			topic = claim.topic(),
			partition = claim.partition(),
			offset = claim.initial_offset(),
			"Consuming claim"
		);
		loop {
			// A message already being loaded is always finished
			let message = tokio::select! {
				biased;
				_ = self.canceller.cancelled() => break,
				message = claim.next() => match message {
					Some(message) => message,
					None => break,
				},
			};
			self.process(session, &message).await?;
		}
		Ok(())
	}
}

/// A running consumer, which has joined its group at least once.
pub struct ConsumerHandle {
	task: Task,
	handler: Arc<ConsumerHandler>,
}

impl ConsumerHandle {
	/// Watch the membership state of the consumer
	pub fn state(&self) -> watch::Receiver<MemberState> {
		self.handler.state()
	}

	/// The generation of the most recent session
	pub fn generation(&self) -> u64 {
		self.handler.generation()
	}

	/// The task which keeps the consumer in its group
	pub fn into_task(self) -> Task {
		self.task
	}
}

/// Joins the consumer group, and bulk-loads every batch consumed into local storage.
///
/// Returns `Ok(None)` when no source brokers are configured. Otherwise this
/// returns once the first session has been set up. Failing to construct the
/// group member within the retry policy is fatal to the node, and is returned
/// as [`Error::BrokerUnavailable`].
pub async fn start_consuming(
	store: Arc<dyn Store>,
	connector: Arc<dyn Connector>,
	opts: &CdcOptions,
	canceller: CancellationToken,
) -> Result<Option<ConsumerHandle>, Error> {
	info!(target: TARGET, "Source log bus brokers: {:?}", opts.source_brokers);
	if opts.source_brokers.is_empty() {
		return Ok(None);
	}
	let config = ConsumerConfig {
		version: MIN_PROTOCOL_VERSION,
	};
	let group = opts
		.retry
		.run(&canceller, "the log bus consumer", || {
			connector.consumer_group(&opts.source_brokers, &opts.group, config)
		})
		.await?;
	let (handler, ready) = ConsumerHandler::new(store, opts.loader_parallelism, canceller.clone());
	let handler = Arc::new(handler);
	let topics = vec![opts.topic.clone()];
	let delay = opts.rejoin_delay;
	let task = {
		let handler = handler.clone();
		let canceller = canceller.clone();
		tokio::spawn(async move {
			// Re-join the group after every rebalance, until the canceller fires
			while !canceller.is_cancelled() {
				if let Err(e) = group.consume(&canceller, &topics, handler.clone()).await {
					error!(target: TARGET, "Error while consuming from the log bus: {e}");
					tokio::select! {
						biased;
						_ = canceller.cancelled() => break,
						_ = tokio::time::sleep(delay) => {}
					}
				}
			}
			if let Err(e) = group.close().await {
				warn!(target: TARGET, "Error closing the log bus consumer: {e}");
			}
			trace!(target: TARGET, "Background task exited: Consuming replicated batches");
		})
	};
	let task: Task = Box::pin(task);
	tokio::select! {
		biased;
		_ = canceller.cancelled() => {
			let _ = task.await;
			Err(Error::Shutdown)
		}
		res = ready => match res {
			Ok(()) => {
				info!(target: TARGET, "Log bus consumer up and running");
				Ok(Some(ConsumerHandle {
					task,
					handler,
				}))
			}
			Err(_) => fail!("The consumer task exited before joining its group"),
		},
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;
	use crate::bus::mem::{ADDRESS, Broker};
	use crate::cf::test::{Flaky, Instrumented};
	use crate::cf::{KvRecord, RetryPolicy};
	use crate::cnf::{CDC_CONSUMER_GROUP, CDC_TOPIC};

	fn opts(attempts: u32) -> CdcOptions {
		CdcOptions::default()
			.with_source_brokers(vec![ADDRESS.into()])
			.with_retry(RetryPolicy::fixed(attempts, Duration::from_secs(5)))
			.with_rejoin_delay(Duration::from_millis(10))
	}

	fn publish(broker: &Broker, batch: &KvBatch) {
		broker.publish(CDC_TOPIC, batch.encode().unwrap());
	}

	async fn committed(broker: &Broker, offset: i64) {
		while broker.committed(CDC_CONSUMER_GROUP, CDC_TOPIC) < offset {
			tokio::time::sleep(Duration::from_millis(1)).await;
		}
	}

	#[test_log::test(tokio::test)]
	async fn disabled_without_source_brokers() {
		let store = Arc::new(Instrumented::default());
		let connector = Arc::new(Broker::new().connector());
		let opts = CdcOptions::default();
		let res = start_consuming(store, connector, &opts, CancellationToken::new()).await;
		assert!(res.unwrap().is_none());
	}

	#[test_log::test(tokio::test(start_paused = true))]
	async fn survives_nine_construction_failures() {
		let store = Arc::new(Instrumented::default());
		let broker = Broker::new();
		let connector = Arc::new(Flaky::new(broker.connector(), 9));
		let canceller = CancellationToken::new();
		let handle = start_consuming(store, connector.clone(), &opts(10), canceller.clone()).await;
		let handle = handle.unwrap().unwrap();
		assert_eq!(connector.attempts(), 10);
		canceller.cancel();
		handle.into_task().await.unwrap();
	}

	#[test_log::test(tokio::test(start_paused = true))]
	async fn ten_construction_failures_are_fatal() {
		let store = Arc::new(Instrumented::default());
		let broker = Broker::new();
		let connector = Arc::new(Flaky::new(broker.connector(), 10));
		let res =
			start_consuming(store, connector.clone(), &opts(10), CancellationToken::new()).await;
		assert!(matches!(res, Err(Error::BrokerUnavailable { attempts: 10, .. })));
		assert_eq!(connector.attempts(), 10);
	}

	#[test_log::test(tokio::test)]
	async fn applies_records_in_batch_order() {
		let store = Instrumented::default();
		let broker = Broker::new();
		let canceller = CancellationToken::new();
		let (shared, connector) = (Arc::new(store.clone()), Arc::new(broker.connector()));
		let handle = start_consuming(shared, connector, &opts(1), canceller.clone())
			.await
			.unwrap()
			.unwrap();
		let batch = KvBatch::new(vec![
			KvRecord::set("counter", "1", 1),
			KvRecord::set("counter", "2", 2),
			KvRecord::set("other", "x", 2),
			KvRecord::set("counter", "3", 3),
			KvRecord::delete("other", 4),
		]);
		publish(&broker, &batch);
		committed(&broker, 1).await;
		assert_eq!(store.ds.get(b"counter"), Some(b"3".to_vec()));
		assert_eq!(store.ds.get(b"other"), None);
		assert_eq!(store.loads(), 1);
		canceller.cancel();
		handle.into_task().await.unwrap();
	}

	#[test_log::test(tokio::test)]
	async fn redelivered_batches_load_idempotently() {
		let store = Instrumented::default();
		let broker = Broker::new();
		let canceller = CancellationToken::new();
		let (shared, connector) = (Arc::new(store.clone()), Arc::new(broker.connector()));
		let handle = start_consuming(shared, connector, &opts(1), canceller.clone())
			.await
			.unwrap()
			.unwrap();
		let batch = KvBatch::new(vec![KvRecord::set("a", "1", 1), KvRecord::set("b", "2", 1)]);
		publish(&broker, &batch);
		publish(&broker, &KvBatch::new(vec![KvRecord::delete("a", 2)]));
		committed(&broker, 2).await;
		let once = store.ds.snapshot();
		// Simulate a crash after loading, but before the offsets were committed
		broker.reset_offset(CDC_CONSUMER_GROUP, CDC_TOPIC, 0);
		broker.rebalance();
		while store.loads() < 4 {
			tokio::time::sleep(Duration::from_millis(1)).await;
		}
		committed(&broker, 2).await;
		assert_eq!(store.ds.snapshot(), once);
		assert_eq!(once, vec![(b"b".to_vec(), b"2".to_vec())]);
		canceller.cancel();
		handle.into_task().await.unwrap();
	}

	#[test_log::test(tokio::test)]
	async fn corrupt_messages_end_the_claim_without_marking() {
		let store = Arc::new(Instrumented::default());
		let broker = Broker::new();
		let group = broker
			.connector()
			.consumer_group(
				&[ADDRESS.to_owned()],
				CDC_CONSUMER_GROUP,
				ConsumerConfig {
					version: MIN_PROTOCOL_VERSION,
				},
			)
			.await
			.unwrap();
		publish(&broker, &KvBatch::new(vec![KvRecord::set("k", "v", 1)]));
		broker.publish(CDC_TOPIC, b"\xff\xff\xff\xff".to_vec());
		let (handler, _ready) = ConsumerHandler::new(store.clone(), 16, CancellationToken::new());
		let handler = Arc::new(handler);
		let topics = [CDC_TOPIC.to_owned()];
		let res = group.consume(&CancellationToken::new(), &topics, handler.clone()).await;
		assert!(matches!(res, Err(Error::Revision(_))));
		assert_eq!(broker.committed(CDC_CONSUMER_GROUP, CDC_TOPIC), 1);
		assert_eq!(store.loads(), 1);
		assert_eq!(*handler.state().borrow(), MemberState::NotReady);
	}

	#[test_log::test(tokio::test)]
	async fn shutdown_finishes_the_load_in_flight() {
		let (store, gate) = Instrumented::gated();
		let broker = Broker::new();
		let canceller = CancellationToken::new();
		let (shared, connector) = (Arc::new(store.clone()), Arc::new(broker.connector()));
		let handle = start_consuming(shared, connector, &opts(1), canceller.clone())
			.await
			.unwrap()
			.unwrap();
		publish(&broker, &KvBatch::new(vec![KvRecord::set("k", "v", 1)]));
		gate.entered.notified().await;
		canceller.cancel();
		gate.release.notify_one();
		handle.into_task().await.unwrap();
		assert_eq!(store.loads(), 1);
		assert_eq!(store.ds.get(b"k"), Some(b"v".to_vec()));
		assert_eq!(broker.committed(CDC_CONSUMER_GROUP, CDC_TOPIC), 1);
	}

	#[test_log::test(tokio::test)]
	async fn rebalances_set_up_again_without_signalling_ready() {
		let store = Instrumented::default();
		let broker = Broker::new();
		let canceller = CancellationToken::new();
		let (shared, connector) = (Arc::new(store.clone()), Arc::new(broker.connector()));
		let handle = start_consuming(shared, connector, &opts(1), canceller.clone())
			.await
			.unwrap()
			.unwrap();
		let first = handle.generation();
		broker.rebalance();
		while handle.generation() == first {
			tokio::time::sleep(Duration::from_millis(1)).await;
		}
		assert_ne!(*handle.state().borrow(), MemberState::NotReady);
		// Consumption carries on in the new session
		publish(&broker, &KvBatch::new(vec![KvRecord::set("k", "v", 1)]));
		committed(&broker, 1).await;
		assert_eq!(store.ds.get(b"k"), Some(b"v".to_vec()));
		canceller.cancel();
		handle.into_task().await.unwrap();
	}

	#[test_log::test(tokio::test)]
	async fn the_ready_gate_opens_once() {
		struct Fake;
		impl Session for Fake {
			fn member_id(&self) -> &str {
				"fake-1"
			}
			fn generation_id(&self) -> u64 {
				7
			}
			fn mark_message(&self, _: &Message, _: &str) {}
		}
		let store = Arc::new(Instrumented::default());
		let (handler, mut ready) = ConsumerHandler::new(store, 16, CancellationToken::new());
		assert!(ready.try_recv().is_err());
		handler.setup(&Fake).await.unwrap();
		assert!(ready.try_recv().is_ok());
		handler.cleanup(&Fake).await.unwrap();
		assert_eq!(*handler.state().borrow(), MemberState::NotReady);
		handler.setup(&Fake).await.unwrap();
		assert_eq!(*handler.state().borrow(), MemberState::Ready);
		assert_eq!(handler.generation(), 7);
	}
}
