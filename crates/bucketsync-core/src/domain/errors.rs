//! Domain error types
//!
//! Errors raised while parsing workflow sources, destinations and object keys.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Filename pattern could not be compiled
    #[error("Invalid glob '{pattern}': {reason}")]
    InvalidGlob {
        /// The offending pattern
        pattern: String,
        /// Compiler message
        reason: String,
    },

    /// Source path has no filename component to filter on
    #[error("Invalid source path: {0}")]
    InvalidSource(String),

    /// Destination URI could not be parsed or lacks a required part
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    /// Destination URI scheme is not one of s3, http, https, webdav, webdavs
    #[error("Unsupported destination scheme: {0}")]
    UnsupportedScheme(String),

    /// Object key is not a valid URL-encoded string
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}
