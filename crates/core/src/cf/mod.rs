//! Change-data-capture replication over the log bus.
//!
//! The producer subscribes to local storage and publishes each committed
//! [`KvBatch`] to a topic. The consumer joins a consumer group on the same
//! topic, and bulk-loads each batch it receives before marking it as
//! consumed, so delivery is at-least-once.

mod batch;
mod consumer;
mod producer;
mod retry;


pub use self::batch::{KvBatch, KvRecord};
pub use self::consumer::{ConsumerHandle, ConsumerHandler, MemberState, start_consuming};
pub use self::producer::start_producing;
pub use self::retry::{Backoff, RetryPolicy};
