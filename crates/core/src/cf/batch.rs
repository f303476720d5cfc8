use revision::revisioned;
use serde::{Deserialize, Serialize};

use crate::err::Error;
use crate::kvs::{Key, Val, Version};

/// A single key-value mutation, as committed to local storage.
#[revisioned(revision = 1)]
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct KvRecord {
	pub key: Key,
	pub value: Val,
	/// The commit version the record was written at
	pub version: Version,
	/// Unix time in seconds after which the record expires, or zero
	pub expires_at: u64,
	pub user_meta: u8,
	/// Whether this record removes the key rather than setting it
	pub deleted: bool,
}

impl KvRecord {
	/// Create a record which sets a key to a value
	pub fn set(key: impl Into<Key>, value: impl Into<Val>, version: Version) -> Self {
		Self {
			key: key.into(),
			value: value.into(),
			version,
			..Default::default()
		}
	}

	/// Create a record which removes a key
	pub fn delete(key: impl Into<Key>, version: Version) -> Self {
		Self {
			key: key.into(),
			version,
			deleted: true,
			..Default::default()
		}
	}
}

/// An ordered set of records committed together, and replicated as one unit.
#[revisioned(revision = 1)]
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct KvBatch {
	pub kv: Vec<KvRecord>,
}

impl KvBatch {
	pub fn new(kv: Vec<KvRecord>) -> Self {
		Self {
			kv,
		}
	}

	pub fn len(&self) -> usize {
		self.kv.len()
	}

	pub fn is_empty(&self) -> bool {
		self.kv.is_empty()
	}

	/// Encode this batch into the bytes placed on the log bus
	pub fn encode(&self) -> Result<Vec<u8>, Error> {
		Ok(revision::to_vec(self)?)
	}

	/// Decode a batch from the bytes read from the log bus
	pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
		Ok(revision::from_slice(bytes)?)
	}
}

impl From<Vec<KvRecord>> for KvBatch {
	fn from(kv: Vec<KvRecord>) -> Self {
		Self::new(kv)
	}
}
