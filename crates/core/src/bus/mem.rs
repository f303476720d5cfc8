#![cfg(feature = "bus-mem")]

//! An in-process log bus.
//!
//! Every topic has a single partition. Consumer group offsets are committed as
//! soon as a message is marked, so any message which was delivered but never
//! marked is delivered again the next time the group joins.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::bus::{
	Claim as ClaimTrait, ConsumerConfig, ConsumerGroup as ConsumerGroupTrait, ConsumerGroupHandler,
	Message, Producer as ProducerTrait, ProducerConfig, ProducerMessage, ProtocolVersion,
	Session as SessionTrait,
};
use crate::err::Error;

const TARGET: &str = "graphwrite::bus";

/// The broker address which the in-memory connector accepts
pub const ADDRESS: &str = "memory";

/// The newest protocol version the in-memory broker speaks
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(3, 0, 0);

/// The only partition of each in-memory topic
const PARTITION: i32 = 0;

/// An in-process broker, shared by every client created from it.
#[derive(Clone, Default)]
pub struct Broker {
	inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
	state: Mutex<State>,
	// Woken whenever a message is published
	published: Notify,
}

#[derive(Default)]
struct State {
	// The messages of each topic, indexed by offset
	topics: HashMap<String, Vec<Message>>,
	// The next offset to deliver for each (group, topic)
	offsets: HashMap<(String, String), i64>,
	// Cancelled and replaced whenever the group membership changes
	rebalance: CancellationToken,
	// The current group generation
	generation: u64,
	// Used to assign member identifiers
	members: u64,
}

impl Broker {
	/// Create a new empty broker
	pub fn new() -> Self {
		Self::default()
	}

	/// Create a connector which hands out clients of this broker
	pub fn connector(&self) -> Connector {
		Connector {
			broker: self.clone(),
		}
	}

	/// Append a message to a topic, returning the partition and offset
	pub fn publish(&self, topic: &str, value: Vec<u8>) -> (i32, i64) {
		let offset = {
			let mut state = self.inner.state.lock();
			let log = state.topics.entry(topic.to_owned()).or_default();
			let offset = log.len() as i64;
			log.push(Message {
				topic: topic.to_owned(),
				partition: PARTITION,
				offset,
				value,
				timestamp: SystemTime::now(),
			});
			offset
		};
		self.inner.published.notify_waiters();
		(PARTITION, offset)
	}

	/// All messages currently stored in a topic
	pub fn messages(&self, topic: &str) -> Vec<Message> {
		self.inner.state.lock().topics.get(topic).cloned().unwrap_or_default()
	}

	/// The next offset which will be delivered to a group for a topic
	pub fn committed(&self, group: &str, topic: &str) -> i64 {
		let state = self.inner.state.lock();
		state.offsets.get(&(group.to_owned(), topic.to_owned())).copied().unwrap_or_default()
	}

	/// Move a group's committed offset for a topic, so that delivery resumes from there
	pub fn reset_offset(&self, group: &str, topic: &str, offset: i64) {
		let mut state = self.inner.state.lock();
		state.offsets.insert((group.to_owned(), topic.to_owned()), offset);
	}

	/// End every active session, forcing all group members to re-join
	pub fn rebalance(&self) {
		let mut state = self.inner.state.lock();
		let previous = std::mem::take(&mut state.rebalance);
		previous.cancel();
	}

	fn fetch(&self, topic: &str, offset: i64) -> Option<Message> {
		let state = self.inner.state.lock();
		let index = usize::try_from(offset).ok()?;
		state.topics.get(topic).and_then(|log| log.get(index)).cloned()
	}

	fn mark(&self, group: &str, message: &Message) {
		let mut state = self.inner.state.lock();
		let next = message.offset + 1;
		let entry = state.offsets.entry((group.to_owned(), message.topic.clone())).or_default();
		if *entry < next {
			*entry = next;
		}
	}

	fn join(&self) -> (u64, CancellationToken) {
		let mut state = self.inner.state.lock();
		state.generation += 1;
		(state.generation, state.rebalance.clone())
	}

	fn member_id(&self, group: &str) -> String {
		let mut state = self.inner.state.lock();
		state.members += 1;
		format!("{group}-{}", state.members)
	}
}

/// Hands out clients of an in-memory [`Broker`].
#[derive(Clone)]
pub struct Connector {
	broker: Broker,
}

impl Connector {
	fn check(brokers: &[String]) -> Result<(), Error> {
		match brokers.iter().find(|b| b.as_str() != ADDRESS) {
			Some(other) => Err(Error::UnsupportedBroker(other.clone())),
			None if brokers.is_empty() => Err(Error::Broker("no broker addresses given".into())),
			None => Ok(()),
		}
	}
}

#[async_trait]
impl crate::bus::Connector for Connector {
	async fn producer(
		&self,
		brokers: &[String],
		config: ProducerConfig,
	) -> Result<Arc<dyn ProducerTrait>, Error> {
		Self::check(brokers)?;
		trace!(target: TARGET, ?config, "Creating in-memory producer");
		Ok(Arc::new(Producer {
			broker: self.broker.clone(),
			closed: AtomicBool::new(false),
		}))
	}

	async fn consumer_group(
		&self,
		brokers: &[String],
		group: &str,
		config: ConsumerConfig,
	) -> Result<Arc<dyn ConsumerGroupTrait>, Error> {
		Self::check(brokers)?;
		if config.version > PROTOCOL_VERSION {
			return Err(Error::Broker(format!(
				"protocol version {} is newer than the supported version {PROTOCOL_VERSION}",
				config.version
			)));
		}
		trace!(target: TARGET, group, ?config, "Creating in-memory consumer group member");
		Ok(Arc::new(ConsumerGroup {
			member_id: self.broker.member_id(group),
			broker: self.broker.clone(),
			group: group.to_owned(),
			closed: AtomicBool::new(false),
		}))
	}
}

pub struct Producer {
	broker: Broker,
	closed: AtomicBool,
}

#[async_trait]
impl ProducerTrait for Producer {
	async fn send(&self, message: ProducerMessage) -> Result<(i32, i64), Error> {
		if self.closed.load(Ordering::Acquire) {
			return Err(Error::BrokerClosed);
		}
		Ok(self.broker.publish(&message.topic, message.value))
	}

	async fn close(&self) -> Result<(), Error> {
		self.closed.store(true, Ordering::Release);
		Ok(())
	}
}

pub struct ConsumerGroup {
	broker: Broker,
	group: String,
	member_id: String,
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
		if topics.is_empty() {
			return Err(Error::Broker("no topics given to consume".into()));
		}
		let (generation, rebalance) = self.broker.join();
		// Ends the session for every claim, whichever way it finishes
		let ended = CancellationToken::new();
		let session = Session {
			broker: self.broker.clone(),
			group: self.group.clone(),
			member_id: self.member_id.clone(),
			generation,
		};
		debug!(target: TARGET, group = %self.group, generation, "Joined consumer group");
		handler.setup(&session).await?;
		let mut claims: Vec<Claim> = topics
			.iter()
			.map(|topic| {
				let position = self.broker.committed(&self.group, topic);
				Claim {
					broker: self.broker.clone(),
					topic: topic.clone(),
					initial: position,
					position,
					canceller: canceller.clone(),
					rebalance: rebalance.clone(),
					ended: ended.clone(),
				}
			})
			.collect();
		let mut running: FuturesUnordered<_> = claims
			.iter_mut()
			.map(|claim| handler.consume_claim(&session, claim as &mut dyn ClaimTrait))
			.collect();
		let mut failure = None;
		while let Some(res) = running.next().await {
			if let Err(e) = res {
				ended.cancel();
				failure.get_or_insert(e);
			}
		}
		drop(running);
		handler.cleanup(&session).await?;
		debug!(target: TARGET, group = %self.group, generation, "Left consumer group session");
		match failure {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}

	async fn close(&self) -> Result<(), Error> {
		self.closed.store(true, Ordering::Release);
		Ok(())
	}
}

struct Session {
	broker: Broker,
	group: String,
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

	fn mark_message(&self, message: &Message, _metadata: &str) {
		self.broker.mark(&self.group, message);
	}
}

struct Claim {
	broker: Broker,
	topic: String,
	initial: i64,
	position: i64,
	canceller: CancellationToken,
	rebalance: CancellationToken,
	ended: CancellationToken,
}

impl Claim {
	fn is_over(&self) -> bool {
		self.canceller.is_cancelled() || self.rebalance.is_cancelled() || self.ended.is_cancelled()
	}
}

#[async_trait]
impl ClaimTrait for Claim {
	fn topic(&self) -> &str {
		&self.topic
	}

	fn partition(&self) -> i32 {
		PARTITION
	}

	fn initial_offset(&self) -> i64 {
		self.initial
	}

	async fn next(&mut self) -> Option<Message> {
		loop {
			if self.is_over() {
				return None;
			}
			// Register for wakeups before looking, so no publish is missed
			let published = self.broker.inner.published.notified();
			tokio::pin!(published);
			published.as_mut().enable();
			if let Some(message) = self.broker.fetch(&self.topic, self.position) {
				self.position += 1;
				return Some(message);
			}
			tokio::select! {
				biased;
				_ = self.canceller.cancelled() => return None,
				_ = self.rebalance.cancelled() => return None,
				_ = self.ended.cancelled() => return None,
				_ = &mut published => {}
			}
		}
	}
}
