//! Storage port (driven/secondary port)
//!
//! One [`StorageBackend`] talks to one S3-compatible endpoint or one WebDAV
//! server. Object store backends address objects by bucket and key; WebDAV
//! backends ignore the bucket and treat the key as a server path.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because errors at port boundaries are
//!   adapter-specific and don't need domain-level classification.
//! - Bodies are streamed in both directions; nothing is buffered whole.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::AsyncRead;

use crate::config::Remote;
use crate::domain::{Endpoint, WebDavTarget};

/// Address of an object on a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// Bucket name; empty for WebDAV backends.
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// A WebDAV path; there is no bucket.
    pub fn path(path: impl Into<String>) -> Self {
        Self::new(String::new(), path)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bucket.is_empty() {
            f.write_str(&self.key)
        } else {
            write!(f, "{}/{}", self.bucket, self.key)
        }
    }
}

/// Streaming body of a downloaded object.
pub struct ObjectReader {
    /// Size reported by the backend.
    pub size: u64,
    pub body: Pin<Box<dyn AsyncRead + Send>>,
}

impl fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectReader")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Object operations on a remote store.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Streams `size` bytes from `file` into `object`, replacing any existing
    /// content. Returns the number of bytes uploaded.
    async fn put(&self, object: &ObjectRef, file: tokio::fs::File, size: u64)
        -> anyhow::Result<u64>;

    /// Opens `object` for reading.
    async fn get(&self, object: &ObjectRef) -> anyhow::Result<ObjectReader>;

    /// Returns true when `object` exists.
    async fn exists(&self, object: &ObjectRef) -> anyhow::Result<bool>;

    async fn delete(&self, object: &ObjectRef) -> anyhow::Result<()>;

    /// Keys of the objects under `prefix` (files only, no collections).
    async fn list(&self, bucket: &str, prefix: &str) -> anyhow::Result<Vec<String>>;
}

/// Builds storage backends. Construction may fail (bad endpoint, TLS setup)
/// and is retried by callers.
#[async_trait::async_trait]
pub trait StorageConnector: Send + Sync {
    /// Client for an S3-compatible endpoint using `remote`'s credentials.
    async fn object_store(
        &self,
        endpoint: &Endpoint,
        remote: &Remote,
    ) -> anyhow::Result<Arc<dyn StorageBackend>>;

    /// Client for a WebDAV server; credentials come from the target itself.
    async fn webdav(&self, target: &WebDavTarget) -> anyhow::Result<Arc<dyn StorageBackend>>;
}
