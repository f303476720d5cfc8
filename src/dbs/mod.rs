use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};
use graphwrite_core::bus::Connector;
use graphwrite_core::bus::mem::{ADDRESS, Broker};
use graphwrite_core::cf::{Backoff, RetryPolicy};
use graphwrite_core::cnf::{CDC_CONSUMER_GROUP, CDC_TOPIC};
use graphwrite_core::dbs::Node;
use graphwrite_core::kvs::mem::Datastore;
use graphwrite_core::options::{CdcOptions, parse_brokers};

const TARGET: &str = "graphwrite::dbs";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum BrokerBackoff {
	/// Wait the same delay between every attempt
	#[default]
	Fixed,
	/// Double the delay after every attempt, with jitter
	Exponential,
}

#[derive(Args, Debug)]
pub struct StartCommandCdcOptions {
	#[arg(help = "A comma-separated list of Kafka brokers, or `memory`, to consume batches from")]
	#[arg(env = "GRAPHWRITE_KAFKA_SOURCE_BROKERS", long = "kafka-source-brokers")]
	#[arg(default_value = "")]
	source_brokers: String,
	#[arg(help = "A comma-separated list of Kafka brokers, or `memory`, to publish batches to")]
	#[arg(env = "GRAPHWRITE_KAFKA_TARGET_BROKERS", long = "kafka-target-brokers")]
	#[arg(default_value = "")]
	target_brokers: String,
	#[arg(help = "The topic which batches are exchanged on", hide = true)]
	#[arg(env = "GRAPHWRITE_CDC_TOPIC", long = "cdc-topic", default_value = CDC_TOPIC)]
	topic: String,
	#[arg(help = "The consumer group this node joins", hide = true)]
	#[arg(env = "GRAPHWRITE_CDC_GROUP", long = "cdc-group", default_value = CDC_CONSUMER_GROUP)]
	group: String,
	#[arg(help = "How many times a broker client is constructed before giving up")]
	#[arg(env = "GRAPHWRITE_BROKER_CONNECT_ATTEMPTS", long = "broker-connect-attempts")]
	#[arg(value_parser = crate::cli::validator::attempts)]
	connect_attempts: Option<u32>,
	#[arg(help = "How long to wait after a failed broker client construction")]
	#[arg(env = "GRAPHWRITE_BROKER_CONNECT_DELAY", long = "broker-connect-delay")]
	#[arg(value_parser = crate::cli::validator::duration)]
	connect_delay: Option<Duration>,
	#[arg(help = "How the delay between broker client constructions grows")]
	#[arg(env = "GRAPHWRITE_BROKER_BACKOFF", long = "broker-backoff")]
	#[arg(value_enum, default_value_t = BrokerBackoff::Fixed)]
	backoff: BrokerBackoff,
	#[arg(help = "The longest delay between broker client constructions with exponential backoff")]
	#[arg(env = "GRAPHWRITE_BROKER_BACKOFF_MAX", long = "broker-backoff-max")]
	#[arg(value_parser = crate::cli::validator::duration, default_value = "1m")]
	backoff_max: Duration,
	#[arg(help = "How long to wait before re-joining the consumer group after an error")]
	#[arg(env = "GRAPHWRITE_CONSUMER_REJOIN_DELAY", long = "consumer-rejoin-delay")]
	#[arg(value_parser = crate::cli::validator::duration)]
	rejoin_delay: Option<Duration>,
}

impl StartCommandCdcOptions {
	/// Convert the command line arguments into node options
	pub fn into_options(self) -> CdcOptions {
		let defaults = RetryPolicy::default();
		let retry = RetryPolicy::fixed(
			self.connect_attempts.unwrap_or(defaults.attempts),
			self.connect_delay.unwrap_or(defaults.delay),
		);
		let retry = match self.backoff {
			BrokerBackoff::Fixed => retry,
			BrokerBackoff::Exponential => retry.with_backoff(Backoff::Exponential {
				max: self.backoff_max,
				jitter: true,
			}),
		};
		let options = CdcOptions::new()
			.with_source_brokers(parse_brokers(&self.source_brokers))
			.with_target_brokers(parse_brokers(&self.target_brokers))
			.with_topic(self.topic)
			.with_group(self.group)
			.with_retry(retry);
		match self.rejoin_delay {
			Some(delay) => options.with_rejoin_delay(delay),
			None => options,
		}
	}
}

/// Create the node this process runs.
///
/// The node stores its data in memory. The log bus is an in-process broker
/// addressed as `memory`, unless a Kafka broker is configured.
#[instrument(level = "trace", target = "graphwrite::dbs", name = "init_node", skip_all)]
pub fn init(opts: StartCommandCdcOptions) -> Node {
	let options = opts.into_options();
	debug!(target: TARGET, retry = ?options.retry, "Creating an in-memory node");
	let connector = connector(&options);
	Node::new(Arc::new(Datastore::new()), connector, options)
}

/// Whether any configured broker is reached outside of this process
fn external_brokers(options: &CdcOptions) -> bool {
	options.source_brokers.iter().chain(&options.target_brokers).any(|b| b != ADDRESS)
}

/// Choose how the configured brokers are reached
fn connector(options: &CdcOptions) -> Arc<dyn Connector> {
	#[cfg(feature = "kafka")]
	if external_brokers(options) {
		debug!(target: TARGET, "Reaching the log bus through a Kafka cluster");
		return Arc::new(graphwrite_core::bus::kafka::Connector::new());
	}
	#[cfg(not(feature = "kafka"))]
	if external_brokers(options) {
		warn!(target: TARGET, "Only `{ADDRESS}` brokers are reachable without Kafka support");
	}
	Arc::new(Broker::new().connector())
}
