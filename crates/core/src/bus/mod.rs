//! The module defining the log bus which replication runs over.
//!
//! The write path consumes the log bus only through the traits defined here:
//! - a [`Connector`] constructs clients for a list of broker addresses
//! - a [`Producer`] publishes messages to a topic, acknowledging each one
//! - a [`ConsumerGroup`] joins a named group and drives a
//!   [`ConsumerGroupHandler`] through one session per rebalance
//!
//! These capabilities can be provided by the following implementations:
//! - `mem`: an in-process broker with consumer group offsets, used for
//!   single-node deployments and in tests
//! - `kafka`: a Kafka cluster, reached through librdkafka

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::err::Error;

#[cfg(feature = "bus-kafka")]
pub mod kafka;
#[cfg(feature = "bus-mem")]
pub mod mem;

/// A version of the log bus wire protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProtocolVersion {
	pub major: u16,
	pub minor: u16,
	pub patch: u16,
}

impl ProtocolVersion {
	pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
		Self {
			major,
			minor,
			patch,
		}
	}
}

impl fmt::Display for ProtocolVersion {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
	}
}

/// A message delivered to a consumer group member.
#[derive(Clone, Debug)]
pub struct Message {
	pub topic: String,
	pub partition: i32,
	pub offset: i64,
	pub value: Vec<u8>,
	pub timestamp: SystemTime,
}

/// A message to be published by a [`Producer`].
#[derive(Clone, Debug)]
pub struct ProducerMessage {
	pub topic: String,
	pub value: Vec<u8>,
}

/// Configuration used when constructing a [`Producer`].
#[derive(Clone, Copy, Debug)]
pub struct ProducerConfig {
	/// Wait for the broker to acknowledge each message before returning
	pub return_successes: bool,
}

/// Configuration used when constructing a [`ConsumerGroup`].
#[derive(Clone, Copy, Debug)]
pub struct ConsumerConfig {
	/// The minimum protocol version the group member speaks
	pub version: ProtocolVersion,
}

/// Constructs log bus clients for a list of broker addresses.
#[async_trait]
pub trait Connector: Send + Sync {
	/// Construct a producer connected to the given brokers.
	async fn producer(
		&self,
		brokers: &[String],
		config: ProducerConfig,
	) -> Result<Arc<dyn Producer>, Error>;

	/// Construct a member of the named consumer group, connected to the given brokers.
	async fn consumer_group(
		&self,
		brokers: &[String],
		group: &str,
		config: ConsumerConfig,
	) -> Result<Arc<dyn ConsumerGroup>, Error>;
}

/// Publishes messages to the log bus.
#[async_trait]
pub trait Producer: Send + Sync {
	/// Publish a single message, returning the partition and offset it was stored at.
	async fn send(&self, message: ProducerMessage) -> Result<(i32, i64), Error>;

	/// Close the producer, flushing anything buffered.
	async fn close(&self) -> Result<(), Error>;
}

/// A member of a consumer group.
#[async_trait]
pub trait ConsumerGroup: Send + Sync {
	/// Join the group and consume the given topics until the session ends.
	///
	/// A session ends when the group rebalances, when a claim returns an error,
	/// or when the canceller fires. The handler's `setup` runs before any claim
	/// is consumed, and its `cleanup` runs once every claim has returned. The
	/// caller is expected to call this again to re-join the group.
	async fn consume(
		&self,
		canceller: &CancellationToken,
		topics: &[String],
		handler: Arc<dyn ConsumerGroupHandler>,
	) -> Result<(), Error>;

	/// Leave the group and close the client.
	async fn close(&self) -> Result<(), Error>;
}

/// The state of one consumer group session.
pub trait Session: Send + Sync {
	/// The identifier of this member within the group
	fn member_id(&self) -> &str;

	/// The generation of the group this session belongs to
	fn generation_id(&self) -> u64;

	/// Mark a message as consumed. The offset after it is committed for the group,
	/// so the message will not be delivered again to any member.
	fn mark_message(&self, message: &Message, metadata: &str);
}

/// A claim on one topic partition within a session.
#[async_trait]
pub trait Claim: Send {
	fn topic(&self) -> &str;

	fn partition(&self) -> i32;

	/// The offset the claim started consuming from
	fn initial_offset(&self) -> i64;

	/// Wait for the next message. Returns `None` once the session is over.
	async fn next(&mut self) -> Option<Message>;
}

/// Callbacks driven by a [`ConsumerGroup`] over each session.
#[async_trait]
pub trait ConsumerGroupHandler: Send + Sync {
	/// Run at the beginning of a new session, before any claim is consumed.
	async fn setup(&self, session: &dyn Session) -> Result<(), Error>;

	/// Run at the end of a session, once every claim has returned.
	async fn cleanup(&self, session: &dyn Session) -> Result<(), Error>;

	/// Consume the messages of a single claim.
	async fn consume_claim(&self, session: &dyn Session, claim: &mut dyn Claim)
	-> Result<(), Error>;
}
