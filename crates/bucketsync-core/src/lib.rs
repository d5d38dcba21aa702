//! bucketsync core - domain logic shared by the synchronization pipelines
//!
//! This crate contains:
//! - **Configuration** - the YAML document describing workflows and remotes
//! - **Domain types** - filename globs, destination URIs, bucket notifications
//! - **Credential resolution** - lookup of remotes by name or endpoint host
//! - **Port definitions** - traits for adapters: [`ports::StorageBackend`],
//!   [`ports::StorageConnector`], [`ports::MessageBroker`]
//! - **Backoff retrier** - bounded retries with exponential delay and jitter
//!
//! # Architecture
//!
//! The pipelines in `bucketsync-sync` depend only on the ports defined here.
//! Concrete adapters (S3, WebDAV, AMQP) live in their own crates and are wired
//! together by the daemon binary.

pub mod config;
pub mod credentials;
pub mod domain;
pub mod ports;
pub mod retry;
