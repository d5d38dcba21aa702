//! bucketsync Sync - the synchronization pipelines
//!
//! Provides:
//! - Outbound: local file writes uploaded to an object store or WebDAV server
//! - Inbound: bucket notifications consumed from AMQP and downloaded locally
//! - Reconnection of inbound consumers with bounded backoff
//! - A supervisor that starts every configured workflow and stops them on
//!   shutdown
//!
//! ## Modules
//!
//! - [`watcher`] - filesystem watcher and debounce queue
//! - [`outbound`] - watch → filter → upload pipeline
//! - [`inbound`] - consume → download pipeline and its connection state machine
//! - [`supervisor`] - workflow lifecycle

pub mod inbound;
pub mod outbound;
pub mod supervisor;
pub mod watcher;

use std::path::PathBuf;

use bucketsync_core::domain::DomainError;
use thiserror::Error;

pub use inbound::{InboundError, InboundHandle, InboundPipeline, InboundState};
pub use outbound::{OutboundHandle, OutboundPipeline};
pub use supervisor::{RunningWorkflows, Supervisor};

/// Errors that prevent a workflow from starting
#[derive(Debug, Error)]
pub enum SyncError {
    /// The watch directory could not be registered with the OS
    #[error("Failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The workflow definition could not be parsed
    #[error("Invalid workflow '{workflow}': {source}")]
    Config {
        workflow: String,
        #[source]
        source: DomainError,
    },
}
