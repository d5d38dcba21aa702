//! Storage adapters for bucketsyncd
//!
//! Implements [`bucketsync_core::ports::StorageBackend`] for:
//! - S3-compatible object stores ([`s3::S3Backend`], via `aws-sdk-s3`)
//! - WebDAV servers ([`webdav::WebDavBackend`], via `reqwest`)
//!
//! [`connector::DefaultStorageConnector`] builds the right backend for an
//! outbound destination or an inbound remote.

pub mod connector;
pub mod s3;
pub mod webdav;

pub use connector::DefaultStorageConnector;
pub use s3::S3Backend;
pub use webdav::WebDavBackend;
