//! Port definitions (hexagonal architecture interfaces)
//!
//! The pipelines in `bucketsync-sync` depend on these traits only; the
//! implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`StorageBackend`] - object operations on one S3 endpoint or WebDAV server
//! - [`StorageConnector`] - builds a [`StorageBackend`] for a destination or remote
//! - [`MessageBroker`] - dials the notification broker
//! - [`BrokerConnection`] / [`BrokerChannel`] - one live connection, its channels
//!   and subscriptions

pub mod broker;
pub mod storage;

pub use broker::{
    Acknowledger, BrokerChannel, BrokerConnection, BrokerLink, Delivery, DeliveryStream,
    MessageBroker, QueueBinding, CONNECTION_NAME, CONSUMER_TAG,
};
pub use storage::{ObjectReader, ObjectRef, StorageBackend, StorageConnector};
