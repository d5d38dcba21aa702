//! Outbound pipeline: watch → filter → upload
//!
//! Each outbound workflow owns one [`FileWatcher`] on its source directory and
//! one task that handles the watcher's events in order. An event becomes an
//! upload only when it is a content write and its base filename matches the
//! workflow glob; every other event is ignored. Failures are event-local:
//! they are logged and the next write to the same file tries again.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bucketsync_core::config::OutboundWorkflow;
use bucketsync_core::credentials::CredentialResolver;
use bucketsync_core::domain::{Destination, DomainError, SourcePattern};
use bucketsync_core::ports::{ObjectRef, StorageBackend, StorageConnector};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::watcher::{ChangeEvent, DebouncedChangeQueue, FileWatcher};
use crate::SyncError;

// ============================================================================
// Outcomes and errors
// ============================================================================

/// Why an event did not lead to an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Create, remove, rename, metadata or access event
    NotAWrite,
    /// The base filename does not match the workflow glob
    GlobMismatch,
}

/// Result of handling one watcher event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Uploaded { target: String, bytes: u64 },
    Ignored(IgnoreReason),
}

/// Event-local failures; the event is dropped
#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid destination: {0}")]
    Destination(#[from] DomainError),

    #[error("No remote configured for endpoint '{host}'")]
    NoCredentials { host: String },

    #[error("Failed to create storage client for {endpoint}: {error:#}")]
    Client {
        endpoint: String,
        error: anyhow::Error,
    },

    #[error("Failed to upload {path} to {target}: {error:#}")]
    Upload {
        path: PathBuf,
        target: String,
        error: anyhow::Error,
    },
}

// ============================================================================
// OutboundWorker
// ============================================================================

/// Turns watcher events of one workflow into uploads
pub struct OutboundWorker {
    workflow: OutboundWorkflow,
    source: SourcePattern,
    credentials: CredentialResolver,
    storage: Arc<dyn StorageConnector>,
}

impl OutboundWorker {
    pub fn new(
        workflow: OutboundWorkflow,
        credentials: CredentialResolver,
        storage: Arc<dyn StorageConnector>,
    ) -> Result<Self, SyncError> {
        let source = SourcePattern::parse(&workflow.source).map_err(|source| SyncError::Config {
            workflow: workflow.name.clone(),
            source,
        })?;

        Ok(Self {
            workflow,
            source,
            credentials,
            storage,
        })
    }

    /// Directory the workflow watches.
    pub fn watch_dir(&self) -> &Path {
        &self.source.directory
    }

    /// Filters an event without touching the filesystem.
    pub fn classify(&self, event: &ChangeEvent) -> Option<IgnoreReason> {
        if !event.is_content_write() {
            return Some(IgnoreReason::NotAWrite);
        }
        if !self.source.matches_path(event.path()) {
            return Some(IgnoreReason::GlobMismatch);
        }
        None
    }

    /// Handles one event: filter, then upload.
    pub async fn handle_event(&self, event: &ChangeEvent) -> Result<EventOutcome, OutboundError> {
        if let Some(reason) = self.classify(event) {
            return Ok(EventOutcome::Ignored(reason));
        }
        self.upload(event.path()).await
    }

    /// Uploads `path` to the workflow destination.
    pub async fn upload(&self, path: &Path) -> Result<EventOutcome, OutboundError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let open_error = |source: std::io::Error| OutboundError::Open {
            path: path.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::open(path).await.map_err(open_error)?;
        let size = file.metadata().await.map_err(open_error)?.len();

        let (backend, object) = self.resolve(&filename).await?;
        let target = object.to_string();

        let bytes = backend
            .put(&object, file, size)
            .await
            .map_err(|error| OutboundError::Upload {
                path: path.to_path_buf(),
                target: target.clone(),
                error,
            })?;

        Ok(EventOutcome::Uploaded { target, bytes })
    }

    /// Picks the backend and remote address for `filename`.
    async fn resolve(
        &self,
        filename: &str,
    ) -> Result<(Arc<dyn StorageBackend>, ObjectRef), OutboundError> {
        match Destination::parse(&self.workflow.destination)? {
            Destination::ObjectStore(target) => {
                let remote = self
                    .credentials
                    .by_endpoint_host(&target.endpoint.host)
                    .ok_or_else(|| OutboundError::NoCredentials {
                        host: target.endpoint.host.clone(),
                    })?;

                let backend = self
                    .storage
                    .object_store(&target.endpoint, remote)
                    .await
                    .map_err(|error| OutboundError::Client {
                        endpoint: target.endpoint.to_string(),
                        error,
                    })?;

                let object = ObjectRef::new(target.bucket.clone(), target.key_for(filename));
                Ok((backend, object))
            }
            Destination::WebDav(target) => {
                let backend =
                    self.storage
                        .webdav(&target)
                        .await
                        .map_err(|error| OutboundError::Client {
                            endpoint: target.base_url.to_string(),
                            error,
                        })?;

                Ok((backend, ObjectRef::path(target.path_for(filename))))
            }
        }
    }

    /// Handles an event and logs what happened.
    async fn process(&self, event: &ChangeEvent) {
        match self.handle_event(event).await {
            Ok(EventOutcome::Uploaded { target, bytes }) => {
                info!(
                    path = %event.path().display(),
                    target = %target,
                    bytes,
                    "Uploaded file"
                );
            }
            Ok(EventOutcome::Ignored(reason)) => {
                debug!(path = %event.path().display(), ?reason, "Ignoring event");
            }
            Err(e) => {
                error!(path = %event.path().display(), error = %e, "Upload failed");
            }
        }
    }
}

// ============================================================================
// OutboundPipeline
// ============================================================================

/// Starts outbound workflows.
pub struct OutboundPipeline;

impl OutboundPipeline {
    /// Registers the watch and spawns the workflow's event task
    ///
    /// # Errors
    /// [`SyncError::Config`] when the source pattern is invalid,
    /// [`SyncError::Watch`] when the directory cannot be watched.
    pub fn start(
        workflow: OutboundWorkflow,
        credentials: CredentialResolver,
        storage: Arc<dyn StorageConnector>,
        shutdown: CancellationToken,
    ) -> Result<OutboundHandle, SyncError> {
        let name = workflow.name.clone();
        let debounce = Duration::from_millis(workflow.debounce_ms);

        if workflow.sensitive {
            warn!(workflow = %name, "Workflow is marked sensitive; content is uploaded unmodified");
        }
        if let Some(processor) = workflow.process_with.as_deref().filter(|p| !p.is_empty()) {
            warn!(
                workflow = %name,
                process_with = processor,
                "Content processing is not supported; uploading unmodified"
            );
        }

        let worker = OutboundWorker::new(workflow, credentials, storage)?;
        let dir = worker.watch_dir().to_path_buf();

        let watch_error = |source: notify::Error| SyncError::Watch {
            path: dir.clone(),
            source,
        };
        let (mut watcher, events) = FileWatcher::new().map_err(watch_error)?;
        watcher.watch(&dir).map_err(watch_error)?;

        let queue = (!debounce.is_zero()).then(|| DebouncedChangeQueue::new(debounce));
        let task = tokio::spawn(
            run(worker, watcher, events, queue, shutdown.clone())
                .instrument(info_span!("outbound", workflow = %name)),
        );

        info!(workflow = %name, dir = %dir.display(), "Outbound workflow started");

        Ok(OutboundHandle {
            name,
            shutdown,
            task,
        })
    }
}

/// A running outbound workflow
#[derive(Debug)]
pub struct OutboundHandle {
    name: String,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl OutboundHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the event task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the workflow and waits for its task.
    pub async fn close(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            error!(workflow = %self.name, error = %e, "Outbound task failed");
        }
    }
}

async fn run(
    worker: OutboundWorker,
    watcher: FileWatcher,
    mut events: mpsc::Receiver<ChangeEvent>,
    mut queue: Option<DebouncedChangeQueue>,
    shutdown: CancellationToken,
) {
    // The OS watch lives as long as this task
    let _watcher = watcher;

    loop {
        let deadline = queue.as_ref().and_then(DebouncedChangeQueue::next_deadline);

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Outbound workflow stopping");
                break;
            }

            event = events.recv() => {
                let Some(event) = event else {
                    warn!("Watcher channel closed");
                    break;
                };
                match queue.as_mut() {
                    Some(queue) => match worker.classify(&event) {
                        None => queue.push(event),
                        Some(reason) => {
                            debug!(path = %event.path().display(), ?reason, "Ignoring event");
                        }
                    },
                    None => worker.process(&event).await,
                }
            }

            _ = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)),
                if deadline.is_some() =>
            {
                if let Some(queue) = queue.as_mut() {
                    for event in queue.poll() {
                        worker.process(&event).await;
                    }
                }
            }
        }
    }
}
