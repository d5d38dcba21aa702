//! AMQP 0-9-1 adapter for the [`MessageBroker`] port, built on `lapin`.
//!
//! [`MessageBroker`]: bucketsync_core::ports::MessageBroker

pub mod broker;

pub use broker::AmqpBroker;
