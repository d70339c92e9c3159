#![recursion_limit = "128"]

#![cfg_attr(feature = "clippy", feature(plugin))]
#![cfg_attr(feature = "clippy", plugin(clippy))]

#![allow(dead_code)]

//! Core of a Kafka-protocol client: the broker connection lifecycle,
//! request multiplexer, error classifier, and version-capability model.
//!
//! Everything a producer pipeline, a consumer group coordinator, or an
//! admin API would need is exposed here as a thin contract
//! ([`Codec`](codec::Codec), [`Sasl`](sasl::Sasl)) rather than built in:
//! those layers are out of scope for this crate (see `DESIGN.md`).

#[macro_use]
extern crate log;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate lazy_static;
extern crate bytes;
#[macro_use]
extern crate nom;
#[cfg(feature = "metrics")]
#[macro_use]
extern crate prometheus;

extern crate futures;
extern crate tokio_core;
extern crate tokio_io;
extern crate tokio_timer;

#[cfg(test)]
extern crate pretty_env_logger;

#[macro_use]
pub mod errors;
pub mod ids;
pub mod classify;
pub mod version;
pub mod codec;
pub mod sasl;
pub mod protocol;
pub mod connection;
pub mod broker;
pub mod metrics;

pub use broker::{Broker, BrokerSelector};
pub use classify::{is_dial_error, retriable_on_same_broker, skippable_to_next_broker};
pub use codec::Codec;
pub use connection::{Connection, ConnectionConfig};
pub use errors::{Error, ErrorKind, KafkaCode, Result};
pub use ids::{ApiKey, ApiVersion, BrokerId, CorrelationId};
pub use sasl::{Sasl, SaslStep};
pub use version::VersionTable;
