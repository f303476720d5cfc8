use std::time::Duration;

use crate::cf::RetryPolicy;
use crate::cnf::{
	CDC_CONSUMER_GROUP, CDC_TOPIC, CONSUMER_REJOIN_DELAY_MILLIS, LOADER_PARALLELISM,
};

/// Configuration for the change-data-capture pipelines of a node.
///
/// An empty list of source brokers disables ingestion, and an empty list of
/// target brokers disables replication.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct CdcOptions {
	/// The brokers which replicated batches are consumed from
	pub source_brokers: Vec<String>,
	/// The brokers which locally committed batches are published to
	pub target_brokers: Vec<String>,
	/// The topic used in both directions
	pub topic: String,
	/// The consumer group this node joins
	pub group: String,
	/// The policy used when constructing log bus clients
	pub retry: RetryPolicy,
	/// The parallelism hint given to each bulk loader
	pub loader_parallelism: usize,
	/// How long to wait before re-joining the consumer group after an error
	pub rejoin_delay: Duration,
}

impl Default for CdcOptions {
	fn default() -> Self {
		Self {
			source_brokers: Vec::new(),
			target_brokers: Vec::new(),
			topic: CDC_TOPIC.to_owned(),
			group: CDC_CONSUMER_GROUP.to_owned(),
			retry: RetryPolicy::default(),
			loader_parallelism: LOADER_PARALLELISM,
			rejoin_delay: Duration::from_millis(*CONSUMER_REJOIN_DELAY_MILLIS),
		}
	}
}

impl CdcOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_source_brokers(mut self, brokers: Vec<String>) -> Self {
		self.source_brokers = brokers;
		self
	}

	pub fn with_target_brokers(mut self, brokers: Vec<String>) -> Self {
		self.target_brokers = brokers;
		self
	}

	pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
		self.topic = topic.into();
		self
	}

	pub fn with_group(mut self, group: impl Into<String>) -> Self {
		self.group = group.into();
		self
	}

	pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;
		self
	}

	pub fn with_loader_parallelism(mut self, parallelism: usize) -> Self {
		self.loader_parallelism = parallelism.max(1);
		self
	}

	pub fn with_rejoin_delay(mut self, delay: Duration) -> Self {
		self.rejoin_delay = delay;
		self
	}
}

/// Split a comma-separated list of broker addresses.
pub fn parse_brokers(list: &str) -> Vec<String> {
	list.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect()
}
