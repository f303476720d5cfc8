use std::sync::LazyLock;

use crate::bus::ProtocolVersion;

/// The log topic which committed key-value batches are published to, and consumed from
pub const CDC_TOPIC: &str = "graphwrite-cdc";

/// The consumer group which this node joins when ingesting replicated batches
pub const CDC_CONSUMER_GROUP: &str = "graphwrite-cdc-group";

/// The minimum log bus protocol version required by the consumer group
pub const MIN_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(2, 2, 0);

/// The parallelism hint given to the bulk loader for each consumed batch
pub const LOADER_PARALLELISM: usize = 16;

/// The fixed acknowledgement returned by a successful delete mutation
pub const DELETE_RESPONSE: &str = r#"{ "msg": "Deleted" }"#;

/// How many times a log bus client is constructed before giving up (defaults to 10)
pub static BROKER_CONNECT_ATTEMPTS: LazyLock<u32> =
	lazy_env_parse!("GRAPHWRITE_BROKER_CONNECT_ATTEMPTS", u32, 10);

/// How many seconds to wait between log bus client construction attempts (defaults to 5)
pub static BROKER_CONNECT_DELAY_SECS: LazyLock<u64> =
	lazy_env_parse!("GRAPHWRITE_BROKER_CONNECT_DELAY_SECS", u64, 5);

/// How long the consumer waits before re-joining its group after an error (defaults to 1000ms)
pub static CONSUMER_REJOIN_DELAY_MILLIS: LazyLock<u64> =
	lazy_env_parse!("GRAPHWRITE_CONSUMER_REJOIN_DELAY_MILLIS", u64, 1000);
