#![cfg(feature = "bus-kafka")]

//! A log bus backed by a Kafka cluster.
//!
//! Producers wait for every message to be acknowledged by the cluster. Group
//! members store the offset of each marked message, and the stored offsets
//! are committed to the cluster in the background and when the member closes.
//! Rebalances are handled by the client within a session, so a session only
//! ends when the canceller fires or the client reports an error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::Message as _;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use tokio_util::sync::CancellationToken;

use crate::bus::{
	Claim as ClaimTrait, ConsumerConfig, ConsumerGroup as ConsumerGroupTrait, ConsumerGroupHandler,
	Message, Producer as ProducerTrait, ProducerConfig, ProducerMessage, Session as SessionTrait,
};
use crate::err::Error;

const TARGET: &str = "graphwrite::bus";

/// How long to wait for the cluster when connecting, sending, or closing
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Claims span every partition assigned to the member
const ALL_PARTITIONS: i32 = -1;

/// Claims resume from the offset committed for the group
const COMMITTED_OFFSET: i64 = -1;

impl From<KafkaError> for Error {
	fn from(e: KafkaError) -> Self {
		Error::Broker(e.to_string())
	}
}

/// Constructs clients of a Kafka cluster.
#[derive(Clone, Debug)]
pub struct Connector {
	timeout: Duration,
}

impl Default for Connector {
	fn default() -> Self {
		Self::new()
	}
}

impl Connector {
	pub fn new() -> Self {
		Self {
			timeout: DEFAULT_TIMEOUT,
		}
	}

	/// Set how long to wait for the cluster before giving up
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	fn config(&self, brokers: &[String]) -> Result<ClientConfig, Error> {
		if brokers.is_empty() {
			return Err(Error::Broker("no brokers given to connect to".into()));
		}
		let mut config = ClientConfig::new();
		config
			.set("bootstrap.servers", brokers.join(","))
			.set("socket.timeout.ms", self.timeout.as_millis().to_string());
		Ok(config)
	}

	fn producer_config(
		&self,
		brokers: &[String],
		opts: ProducerConfig,
	) -> Result<ClientConfig, Error> {
		let mut config = self.config(brokers)?;
		config.set("message.timeout.ms", self.timeout.as_millis().to_string());
		if opts.return_successes {
			config.set("acks", "all");
		}
		Ok(config)
	}

	fn consumer_config(
		&self,
		brokers: &[String],
		group: &str,
		opts: ConsumerConfig,
	) -> Result<ClientConfig, Error> {
		let mut config = self.config(brokers)?;
		config
			.set("group.id", group)
			.set("broker.version.fallback", opts.version.to_string())
			.set("auto.offset.reset", "earliest")
			.set("enable.auto.commit", "true")
			// Offsets are only stored once a message is marked
			.set("enable.auto.offset.store", "false");
		Ok(config)
	}
}

/// Run a blocking client call off the async runtime
async fn blocking<T, F>(f: F) -> Result<T, Error>
where
	T: Send + 'static,
	F: FnOnce() -> Result<T, KafkaError> + Send + 'static,
{
	match tokio::task::spawn_blocking(f).await {
		Ok(res) => res.map_err(Error::from),
		Err(e) => Err(Error::Broker(e.to_string())),
	}
}

#[async_trait]
impl crate::bus::Connector for Connector {
	async fn producer(
		&self,
		brokers: &[String],
		config: ProducerConfig,
	) -> Result<Arc<dyn ProducerTrait>, Error> {
		let producer: FutureProducer = self.producer_config(brokers, config)?.create()?;
		// Creating a client does not connect, so make sure the cluster is reachable
		let timeout = self.timeout;
		let client = producer.clone();
		blocking(move || client.client().fetch_metadata(None, timeout).map(|_| ())).await?;
		debug!(target: TARGET, ?brokers, "Connected a producer to the Kafka cluster");
		Ok(Arc::new(Producer {
			producer,
			timeout,
			closed: AtomicBool::new(false),
		}))
	}

	async fn consumer_group(
		&self,
		brokers: &[String],
		group: &str,
		config: ConsumerConfig,
	) -> Result<Arc<dyn ConsumerGroupTrait>, Error> {
		let consumer: StreamConsumer = self.consumer_config(brokers, group, config)?.create()?;
		let consumer = Arc::new(consumer);
		let timeout = self.timeout;
		let client = consumer.clone();
		blocking(move || client.fetch_metadata(None, timeout).map(|_| ())).await?;
		debug!(target: TARGET, ?brokers, group, "Connected a group member to the Kafka cluster");
		Ok(Arc::new(ConsumerGroup {
			consumer,
			group: group.to_owned(),
			generation: AtomicU64::new(0),
			closed: AtomicBool::new(false),
		}))
	}
}

pub struct Producer {
	producer: FutureProducer,
	timeout: Duration,
	closed: AtomicBool,
}

#[async_trait]
impl ProducerTrait for Producer {
	async fn send(&self, message: ProducerMessage) -> Result<(i32, i64), Error> {
		if self.closed.load(Ordering::Acquire) {
			return Err(Error::BrokerClosed);
		}
		let record = FutureRecord::<(), _>::to(&message.topic).payload(&message.value);
		match self.producer.send(record, self.timeout).await {
			Ok((partition, offset)) => Ok((partition, offset)),
			Err((e, _)) => Err(e.into()),
		}
	}

	async fn close(&self) -> Result<(), Error> {
		if self.closed.swap(true, Ordering::AcqRel) {
			return Ok(());
		}
		let (producer, timeout) = (self.producer.clone(), self.timeout);
		blocking(move || producer.flush(timeout)).await
	}
}

pub struct ConsumerGroup {
	consumer: Arc<StreamConsumer>,
	group: String,
	// Counts the sessions of this member
	generation: AtomicU64,
	closed: AtomicBool,
}

#[async_trait]
impl ConsumerGroupTrait for ConsumerGroup {
	async fn consume(
		&self,
		canceller: &CancellationToken,
		topics: &[String],
		handler: Arc<dyn ConsumerGroupHandler>,
	) -> Result<(), Error> {
		if self.closed.load(Ordering::Acquire) {
			return Err(Error::BrokerClosed);
		}
		let Some(topic) = topics.first() else {
			return Err(Error::Broker("no topics given to consume".into()));
		};
		let names: Vec<&str> = topics.iter().map(String::as_str).collect();
		self.consumer.subscribe(&names)?;
		let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
		let session = Session {
			consumer: self.consumer.clone(),
			member_id: format!("{}-{generation}", self.group),
			generation,
		};
		debug!(target: TARGET, group = %self.group, generation, "Joined consumer group");
		handler.setup(&session).await?;
		let mut claim = Claim {
			consumer: self.consumer.clone(),
			topic: topic.clone(),
			canceller: canceller.clone(),
			failure: None,
		};
		let res = handler.consume_claim(&session, &mut claim).await;
		handler.cleanup(&session).await?;
		debug!(target: TARGET, group = %self.group, generation, "Left consumer group session");
		res?;
		match claim.failure {
			Some(e) => Err(e.into()),
			None => Ok(()),
		}
	}

	async fn close(&self) -> Result<(), Error> {
		if self.closed.swap(true, Ordering::AcqRel) {
			return Ok(());
		}
		self.consumer.unsubscribe();
		let consumer = self.consumer.clone();
		match blocking(move || consumer.commit_consumer_state(CommitMode::Sync)).await {
			Ok(()) => Ok(()),
			// Nothing was marked since the last commit
			Err(e) => {
				debug!(target: TARGET, group = %self.group, "No offsets committed on close: {e}");
				Ok(())
			}
		}
	}
}

struct Session {
	consumer: Arc<StreamConsumer>,
	member_id: String,
	generation: u64,
}

impl SessionTrait for Session {
	fn member_id(&self) -> &str {
		&self.member_id
	}

	fn generation_id(&self) -> u64 {
		self.generation
	}

	fn mark_message(&self, message: &Message, _: &str) {
		// The offset after the message is the one committed
		let (partition, offset) = (message.partition, message.offset);
		if let Err(e) = self.consumer.store_offset(&message.topic, partition, offset) {
			warn!(target: TARGET, partition, offset, "Unable to mark a consumed message: {e}");
		}
	}
}

struct Claim {
	consumer: Arc<StreamConsumer>,
	topic: String,
	canceller: CancellationToken,
	failure: Option<KafkaError>,
}

#[async_trait]
impl ClaimTrait for Claim {
	fn topic(&self) -> &str {
		&self.topic
	}

	fn partition(&self) -> i32 {
		ALL_PARTITIONS
	}

	fn initial_offset(&self) -> i64 {
		COMMITTED_OFFSET
	}

	async fn next(&mut self) -> Option<Message> {
		if self.failure.is_some() {
			return None;
		}
		let res = tokio::select! {
			biased;
			_ = self.canceller.cancelled() => return None,
			res = self.consumer.recv() => res.map(|m| Message {
				topic: m.topic().to_owned(),
				partition: m.partition(),
				offset: m.offset(),
				value: m.payload().map(<[u8]>::to_vec).unwrap_or_default(),
				timestamp: timestamp(m.timestamp().to_millis()),
			}),
		};
		match res {
			Ok(message) => Some(message),
			Err(e) => {
				error!(target: TARGET, "Error while receiving from the Kafka cluster: {e}");
				self.failure = Some(e);
				None
			}
		}
	}
}

/// The time a message was created, falling back to when it was received
fn timestamp(millis: Option<i64>) -> SystemTime {
	match millis.and_then(|ms| u64::try_from(ms).ok()) {
		Some(ms) => UNIX_EPOCH + Duration::from_millis(ms),
		None => SystemTime::now(),
	}
}
