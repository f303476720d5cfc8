//! # graphwrite core
//!
//! This crate is the write path of the graphwrite graph database. It contains
//! the two pieces on top of which the `graphwrite` binary is implemented:
//!
//! - [`gql`]: resolution of GraphQL mutation fields into backend operations,
//!   including the follow-up query and the shaping of a partial response with
//!   correctly attributed errors.
//! - [`cf`]: change-data-capture replication, publishing committed key-value
//!   batches to a log bus and bulk-loading batches received from it.
//!
//! Storage ([`kvs`]) and the log bus ([`bus`]) are capabilities consumed through
//! traits. In-memory implementations of both are provided behind the `kv-mem`
//! and `bus-mem` features.

#[macro_use]
extern crate tracing;

#[macro_use]
mod mac;

pub mod bus;
pub mod cf;
pub mod cnf;
pub mod ctx;
pub mod dbs;
pub mod err;
pub mod gql;
pub mod kvs;
pub mod options;
