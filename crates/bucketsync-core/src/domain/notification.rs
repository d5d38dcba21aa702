//! Bucket notification payloads
//!
//! S3-compatible stores publish one JSON document per event:
//!
//! ```json
//! {"EventName":"s3:ObjectCreated:Put",
//!  "Records":[{"s3":{"bucket":{"name":"b"},"object":{"key":"a%20b.txt","size":5}}}]}
//! ```
//!
//! Only the fields the inbound pipeline needs are decoded; everything else in
//! the document is ignored.

use serde::Deserialize;
use thiserror::Error;

use super::errors::DomainError;
use super::uri::query_unescape;

/// Errors raised while decoding a notification body
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed notification payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NotificationEvent {
    /// Empty when the store omits it.
    #[serde(rename = "EventName", default)]
    pub event_name: String,
    #[serde(rename = "Records")]
    pub records: Vec<NotificationRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NotificationRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct S3Entity {
    pub bucket: BucketEntity,
    pub object: ObjectEntity,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BucketEntity {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObjectEntity {
    /// URL-encoded object key as published by the store.
    pub key: String,
    #[serde(default)]
    pub size: u64,
}

impl NotificationEvent {
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(body)?)
    }
}

impl NotificationRecord {
    pub fn bucket(&self) -> &str {
        &self.s3.bucket.name
    }

    pub fn size(&self) -> u64 {
        self.s3.object.size
    }

    /// The object key with its URL encoding removed.
    pub fn decoded_key(&self) -> Result<String, DomainError> {
        query_unescape(&self.s3.object.key)
    }
}
