//! Message broker port (driven/secondary port)
//!
//! Inbound workflows receive bucket notifications from an AMQP 0-9-1 broker.
//! The port mirrors the broker's own lifecycle: dial a connection, open a
//! channel, bind the queue, consume deliveries, settle each delivery.
//!
//! ## Design Notes
//!
//! - Dialing returns a [`BrokerLink`]: the connection plus a one-shot close
//!   notification. The notification resolves when the broker or the network
//!   drops the connection (or when the adapter drops its sender).
//! - [`Delivery::ack`] and [`Delivery::reject`] take `self`, so a delivery
//!   can be settled at most once.

use std::fmt;

use futures_util::stream::BoxStream;
use tokio::sync::oneshot;

/// Client connection name announced to the broker.
pub const CONNECTION_NAME: &str = "bucketsyncd";

/// Consumer tag used for every subscription.
pub const CONSUMER_TAG: &str = "bucketsyncd";

/// Settles one delivery with the broker.
#[async_trait::async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> anyhow::Result<()>;
    async fn reject(&self, requeue: bool) -> anyhow::Result<()>;
}

/// One message received from the broker.
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(tag: u64, body: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Self { tag, body, acker }
    }

    pub async fn ack(self) -> anyhow::Result<()> {
        self.acker.ack().await
    }

    pub async fn reject(self, requeue: bool) -> anyhow::Result<()> {
        self.acker.reject(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("tag", &self.tag)
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

/// Deliveries of one consumer, in broker order. The stream ends when the
/// channel or connection goes away.
pub type DeliveryStream = BoxStream<'static, anyhow::Result<Delivery>>;

/// Queue-to-exchange binding of an inbound workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

impl QueueBinding {
    /// Binds `queue` to `exchange` using the exchange name as routing key.
    pub fn new(queue: impl Into<String>, exchange: impl Into<String>) -> Self {
        let exchange = exchange.into();
        Self {
            queue: queue.into(),
            routing_key: exchange.clone(),
            exchange,
        }
    }
}

/// A freshly dialed connection and its close notification.
pub struct BrokerLink {
    pub connection: Box<dyn BrokerConnection>,
    /// Resolves with a reason once the connection is lost.
    pub closed: oneshot::Receiver<String>,
}

impl fmt::Debug for BrokerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerLink").finish_non_exhaustive()
    }
}

/// Dials the broker.
#[async_trait::async_trait]
pub trait MessageBroker: Send + Sync {
    /// Opens a connection to `uri`, announcing `connection_name`.
    async fn dial(&self, uri: &str, connection_name: &str) -> anyhow::Result<BrokerLink>;
}

/// One live broker connection.
#[async_trait::async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn open_channel(&self) -> anyhow::Result<Box<dyn BrokerChannel>>;

    /// Closes the connection if it is still open.
    async fn close(&self) -> anyhow::Result<()>;
}

/// A channel on a broker connection.
#[async_trait::async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn bind(&self, binding: &QueueBinding) -> anyhow::Result<()>;

    /// Starts a manual-ack, non-exclusive consumer on `queue`.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> anyhow::Result<DeliveryStream>;
}
