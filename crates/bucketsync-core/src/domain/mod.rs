//! Domain types and parsing rules
//!
//! This module contains the value types the pipelines operate on:
//! - Source patterns and filename globs for outbound workflows
//! - Destination URIs (object store and WebDAV targets)
//! - Bucket notification payloads delivered over AMQP
//! - URI helpers (key unescaping, credential redaction)
//! - Domain-specific error types

pub mod destination;
pub mod errors;
pub mod glob;
pub mod notification;
pub mod uri;

// Re-export commonly used types
pub use destination::{Destination, Endpoint, ObjectStoreTarget, WebDavTarget};
pub use errors::DomainError;
pub use glob::{FileGlob, SourcePattern};
pub use notification::{DecodeError, NotificationEvent, NotificationRecord};
