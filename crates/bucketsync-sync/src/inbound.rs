//! Inbound pipeline: consume notifications → download objects
//!
//! Each inbound workflow runs a monitor task that owns the broker connection
//! and a consumption worker that processes deliveries in order. The monitor
//! moves through [`InboundState`] and publishes every transition on a `watch`
//! channel:
//!
//! ```text
//! Connecting ──→ Bound ──→ Consuming ──→ ConnectionLost ──→ Reconnecting ──→ Bound ...
//!     │            │                                             │
//!     └────────────┴──────────────→ Failed ←────────────────────┘
//!
//! any state ──(shutdown)──→ Closed
//! ```
//!
//! Dialing (and storage client construction) go through the workflow's
//! [`Backoff`]; binding or consuming failures are terminal for the workflow.
//! Other workflows are never affected.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bucketsync_core::config::{AckPolicy, InboundWorkflow};
use bucketsync_core::credentials::CredentialResolver;
use bucketsync_core::domain::uri::redact;
use bucketsync_core::domain::{DomainError, Endpoint, NotificationEvent, NotificationRecord};
use bucketsync_core::ports::{
    BrokerChannel, BrokerConnection, BrokerLink, Delivery, DeliveryStream, MessageBroker,
    ObjectRef, QueueBinding, StorageConnector, CONNECTION_NAME, CONSUMER_TAG,
};
use bucketsync_core::retry::{Backoff, RetryError};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

// ============================================================================
// State and errors
// ============================================================================

/// Connection state of an inbound workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundState {
    /// Dialing the broker (first connection)
    Connecting,
    /// Queue bound to the exchange
    Bound,
    /// Deliveries are being processed
    Consuming,
    /// The broker connection went away
    ConnectionLost,
    /// Dialing the broker again after a loss
    Reconnecting,
    /// Stopped by shutdown
    Closed,
    /// Stopped by an unrecoverable error
    Failed,
}

impl InboundState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InboundState::Closed | InboundState::Failed)
    }
}

/// Failures that end an inbound workflow
#[derive(Debug, Error)]
pub enum InboundError {
    #[error("Failed to connect to broker: {0}")]
    Connect(#[source] RetryError),

    #[error("Failed to subscribe: {0:#}")]
    Subscribe(anyhow::Error),

    #[error("Inbound task failed: {0}")]
    Task(#[from] JoinError),
}

/// Failures of one notification record; the record is skipped
#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Key(#[from] DomainError),

    #[error("Object key '{0}' does not name a file")]
    NoFileName(String),

    #[error("Remote '{0}' is not configured")]
    UnknownRemote(String),

    #[error("Failed to create storage client: {0}")]
    Client(#[source] RetryError),

    #[error("Failed to fetch {object}: {error:#}")]
    Fetch {
        object: String,
        error: anyhow::Error,
    },

    #[error("Failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to download {object} into {path}: {source}")]
    Transfer {
        object: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Short read for {object}: expected {expected} bytes, got {actual}")]
    ShortRead {
        object: String,
        expected: u64,
        actual: u64,
    },
}

// ============================================================================
// Message processing
// ============================================================================

/// How a delivery was settled with the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Rejected { requeue: bool },
}

/// What happened to one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReport {
    pub tag: u64,
    /// False when the body was not a notification
    pub decoded: bool,
    pub records: usize,
    /// Local files written, in record order
    pub downloaded: Vec<PathBuf>,
    pub failed: usize,
    pub settlement: Settlement,
    /// False when the ack/reject call itself failed
    pub settled: bool,
}

fn settlement_for(policy: AckPolicy, decoded: bool, failed: usize) -> Settlement {
    match policy {
        AckPolicy::Always => Settlement::Acked,
        // Redelivering a body that can't be decoded would loop forever
        AckPolicy::OnSuccess if !decoded => Settlement::Rejected { requeue: false },
        AckPolicy::OnSuccess if failed > 0 => Settlement::Rejected { requeue: true },
        AckPolicy::OnSuccess => Settlement::Acked,
    }
}

/// Downloads the objects named by notifications of one workflow
pub struct MessageProcessor {
    workflow: InboundWorkflow,
    credentials: CredentialResolver,
    storage: Arc<dyn StorageConnector>,
    backoff: Backoff,
}

impl MessageProcessor {
    pub fn new(
        workflow: InboundWorkflow,
        credentials: CredentialResolver,
        storage: Arc<dyn StorageConnector>,
        backoff: Backoff,
    ) -> Self {
        Self {
            workflow,
            credentials,
            storage,
            backoff,
        }
    }

    /// Processes every record of `delivery`, then settles it exactly once.
    pub async fn process(&self, delivery: Delivery) -> MessageReport {
        let tag = delivery.tag;
        let mut decoded = false;
        let mut records = 0;
        let mut downloaded = Vec::new();
        let mut failed = 0;

        match NotificationEvent::decode(&delivery.body) {
            Ok(event) => {
                decoded = true;
                records = event.records.len();
                debug!(tag, event = %event.event_name, records, "Received notification");

                for record in &event.records {
                    match self.process_record(record).await {
                        Ok(path) => {
                            info!(
                                bucket = record.bucket(),
                                key = %record.s3.object.key,
                                size = record.size(),
                                path = %path.display(),
                                "Downloaded object"
                            );
                            downloaded.push(path);
                        }
                        Err(e) => {
                            error!(
                                bucket = record.bucket(),
                                key = %record.s3.object.key,
                                error = %e,
                                "Failed to process record"
                            );
                            failed += 1;
                        }
                    }
                }
            }
            Err(e) => {
                error!(tag, error = %e, "Failed to decode notification");
            }
        }

        let settlement = settlement_for(self.workflow.ack_policy, decoded, failed);
        let result = match settlement {
            Settlement::Acked => delivery.ack().await,
            Settlement::Rejected { requeue } => delivery.reject(requeue).await,
        };
        let settled = match result {
            Ok(()) => true,
            Err(e) => {
                error!(tag, ?settlement, error = %e, "Failed to settle delivery");
                false
            }
        };

        MessageReport {
            tag,
            decoded,
            records,
            downloaded,
            failed,
            settlement,
            settled,
        }
    }

    /// Downloads one record into the destination directory, returning the
    /// local path written.
    pub async fn process_record(&self, record: &NotificationRecord) -> Result<PathBuf, RecordError> {
        let key = record.decoded_key()?;
        let filename = Path::new(&key)
            .file_name()
            .ok_or_else(|| RecordError::NoFileName(key.clone()))?;
        let local_path = self.workflow.destination.join(filename);

        let remote = self
            .credentials
            .by_name(&self.workflow.remote)
            .ok_or_else(|| RecordError::UnknownRemote(self.workflow.remote.clone()))?;
        let endpoint = Endpoint::for_remote(remote);

        let backend = self
            .backoff
            .retry("create storage client", || {
                self.storage.object_store(&endpoint, remote)
            })
            .await
            .map_err(RecordError::Client)?;

        let object = ObjectRef::new(record.bucket(), key.as_str());
        let reader = backend
            .get(&object)
            .await
            .map_err(|error| RecordError::Fetch {
                object: object.to_string(),
                error,
            })?;

        let mut file = tokio::fs::File::create(&local_path)
            .await
            .map_err(|source| RecordError::Create {
                path: local_path.clone(),
                source,
            })?;

        let transfer_error = |source: io::Error| RecordError::Transfer {
            object: object.to_string(),
            path: local_path.clone(),
            source,
        };

        let expected = reader.size;
        let mut body = reader.body.take(expected);
        let actual = tokio::io::copy(&mut body, &mut file)
            .await
            .map_err(transfer_error)?;
        file.flush().await.map_err(transfer_error)?;

        if actual < expected {
            return Err(RecordError::ShortRead {
                object: object.to_string(),
                expected,
                actual,
            });
        }

        Ok(local_path)
    }
}

/// Processes deliveries in order until the stream ends or `cancel` fires.
/// A delivery still in flight at cancellation is dropped unsettled, so the
/// broker redelivers it.
async fn consume(
    processor: Arc<MessageProcessor>,
    mut deliveries: DeliveryStream,
    cancel: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            _ = cancel.cancelled() => return,
            next = deliveries.next() => match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    warn!(error = %e, "Delivery stream failed");
                    return;
                }
                None => return,
            },
        };

        let tag = delivery.tag;
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(tag, "Abandoning in-flight delivery");
                return;
            }
            report = processor.process(delivery) => {
                debug!(
                    tag,
                    records = report.records,
                    failed = report.failed,
                    settlement = ?report.settlement,
                    "Delivery processed"
                );
            }
        }
    }
}

// ============================================================================
// Connection state machine
// ============================================================================

/// A subscribed broker connection.
struct Session {
    connection: Box<dyn BrokerConnection>,
    channel: Box<dyn BrokerChannel>,
    closed: oneshot::Receiver<String>,
    deliveries: DeliveryStream,
}

/// Runs inbound workflows.
pub struct InboundPipeline {
    workflow: InboundWorkflow,
    broker: Arc<dyn MessageBroker>,
    processor: Arc<MessageProcessor>,
    backoff: Backoff,
    state: watch::Sender<InboundState>,
}

impl InboundPipeline {
    /// Spawns the workflow's monitor task
    ///
    /// `shutdown` should be a token owned by this workflow (a child of the
    /// process token); [`InboundHandle::close`] cancels it.
    pub fn start(
        workflow: InboundWorkflow,
        credentials: CredentialResolver,
        storage: Arc<dyn StorageConnector>,
        broker: Arc<dyn MessageBroker>,
        backoff: Backoff,
        shutdown: CancellationToken,
    ) -> InboundHandle {
        let name = workflow.name.clone();
        let (state, state_rx) = watch::channel(InboundState::Connecting);
        let processor = Arc::new(MessageProcessor::new(
            workflow.clone(),
            credentials,
            storage,
            backoff,
        ));

        let pipeline = Self {
            workflow,
            broker,
            processor,
            backoff,
            state,
        };

        let task = tokio::spawn(
            pipeline
                .run(shutdown.clone())
                .instrument(info_span!("inbound", workflow = %name)),
        );

        InboundHandle {
            name,
            state: state_rx,
            shutdown,
            task,
        }
    }

    async fn run(self, shutdown: CancellationToken) -> Result<(), InboundError> {
        info!(
            source = %redact(&self.workflow.source),
            exchange = %self.workflow.exchange,
            queue = %self.workflow.queue,
            "Inbound workflow started"
        );

        let result = self.run_connections(&shutdown).await;
        match &result {
            Ok(()) => self.transition(InboundState::Closed),
            Err(e) => {
                error!(error = %e, "Inbound workflow failed");
                self.transition(InboundState::Failed);
            }
        }
        result
    }

    async fn run_connections(&self, shutdown: &CancellationToken) -> Result<(), InboundError> {
        let mut next = InboundState::Connecting;
        loop {
            self.transition(next);

            let Some(session) = self.establish(shutdown).await? else {
                return Ok(());
            };

            if !self.consume_until_lost(session, shutdown).await || shutdown.is_cancelled() {
                return Ok(());
            }
            next = InboundState::Reconnecting;
        }
    }

    /// Dials, binds and subscribes. `None` when shutdown interrupted it.
    async fn establish(&self, shutdown: &CancellationToken) -> Result<Option<Session>, InboundError> {
        let dial = self.backoff.retry("connect to broker", || {
            self.broker.dial(&self.workflow.source, CONNECTION_NAME)
        });

        let link = tokio::select! {
            _ = shutdown.cancelled() => return Ok(None),
            link = dial => link.map_err(InboundError::Connect)?,
        };
        let BrokerLink { connection, closed } = link;
        info!(source = %redact(&self.workflow.source), "Connected to broker");

        let subscribed = tokio::select! {
            _ = shutdown.cancelled() => None,
            result = self.subscribe(connection.as_ref()) => Some(result),
        };

        match subscribed {
            Some(Ok((channel, deliveries))) => Ok(Some(Session {
                connection,
                channel,
                closed,
                deliveries,
            })),
            Some(Err(e)) => {
                close_connection(connection.as_ref()).await;
                Err(InboundError::Subscribe(e))
            }
            None => {
                close_connection(connection.as_ref()).await;
                Ok(None)
            }
        }
    }

    async fn subscribe(
        &self,
        connection: &dyn BrokerConnection,
    ) -> anyhow::Result<(Box<dyn BrokerChannel>, DeliveryStream)> {
        let channel = connection.open_channel().await?;

        let binding = QueueBinding::new(self.workflow.queue.as_str(), self.workflow.exchange.as_str());
        channel.bind(&binding).await?;
        self.transition(InboundState::Bound);

        let deliveries = channel.consume(&self.workflow.queue, CONSUMER_TAG).await?;
        Ok((channel, deliveries))
    }

    /// Runs a worker on `session` until the connection is lost (returns
    /// true) or shutdown is requested (returns false). The worker has
    /// finished and the connection is closed when this returns.
    async fn consume_until_lost(&self, session: Session, shutdown: &CancellationToken) -> bool {
        let Session {
            connection,
            channel,
            mut closed,
            deliveries,
        } = session;

        let worker_cancel = shutdown.child_token();
        let mut worker = tokio::spawn(
            consume(self.processor.clone(), deliveries, worker_cancel.clone()).in_current_span(),
        );
        self.transition(InboundState::Consuming);

        let (lost, worker_done) = tokio::select! {
            biased;
            _ = shutdown.cancelled() => (false, false),
            reason = &mut closed => {
                let reason = reason.unwrap_or_else(|_| "close notification dropped".to_string());
                warn!(reason = %reason, "Broker connection lost");
                (true, false)
            }
            _ = &mut worker => {
                warn!("Delivery stream ended");
                (true, true)
            }
        };

        if lost {
            self.transition(InboundState::ConnectionLost);
        }

        worker_cancel.cancel();
        if !worker_done {
            if let Err(e) = worker.await {
                error!(error = %e, "Consumption worker failed");
            }
        }

        drop(channel);
        close_connection(connection.as_ref()).await;
        lost
    }

    fn transition(&self, state: InboundState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(from = ?previous, to = ?state, "Inbound state changed");
        }
    }
}

async fn close_connection(connection: &dyn BrokerConnection) {
    if let Err(e) = connection.close().await {
        debug!(error = %e, "Failed to close broker connection");
    }
}

// ============================================================================
// InboundHandle
// ============================================================================

/// A running inbound workflow
#[derive(Debug)]
pub struct InboundHandle {
    name: String,
    state: watch::Receiver<InboundState>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), InboundError>>,
}

impl InboundHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current connection state.
    pub fn state(&self) -> InboundState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<InboundState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the workflow, closing its connection, and waits for it. Returns
    /// the error that ended the workflow if it had already failed.
    pub async fn close(self) -> Result<(), InboundError> {
        self.shutdown.cancel();
        self.task.await?
    }
}
