//! lapin-backed broker, connection, channel and acknowledger.

use anyhow::{Context, Result};
use bucketsync_core::domain::uri::redact;
use bucketsync_core::ports::{
    Acknowledger, BrokerChannel, BrokerConnection, BrokerLink, Delivery, DeliveryStream,
    MessageBroker, QueueBinding,
};
use futures_util::{StreamExt, TryStreamExt};
use lapin::acker::Acker;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicRejectOptions, QueueBindOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::oneshot;
use tracing::debug;

/// Reply code sent with a client-initiated close.
const REPLY_SUCCESS: u16 = 200;

/// Dials AMQP brokers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmqpBroker;

impl AmqpBroker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl MessageBroker for AmqpBroker {
    async fn dial(&self, uri: &str, connection_name: &str) -> Result<BrokerLink> {
        let properties = connection_properties(connection_name);

        let connection = Connection::connect(uri, properties)
            .await
            .with_context(|| format!("Failed to connect to {}", redact(uri)))?;

        let (tx, closed) = oneshot::channel();
        let mut tx = Some(tx);
        connection.on_error(move |err| {
            if let Some(tx) = tx.take() {
                // The pipeline may already have stopped listening
                let _ = tx.send(err.to_string());
            }
        });

        debug!(source = %redact(uri), "Connected to broker");

        Ok(BrokerLink {
            connection: Box::new(AmqpConnection { connection }),
            closed,
        })
    }
}

/// Properties announcing `connection_name`, with lapin's I/O and internal
/// tasks driven by the current tokio runtime.
fn connection_properties(connection_name: &str) -> ConnectionProperties {
    ConnectionProperties::default()
        .with_connection_name(connection_name.to_string().into())
        .with_executor(tokio_executor_trait::Tokio::current())
        .with_reactor(tokio_reactor_trait::Tokio)
}

struct AmqpConnection {
    connection: Connection,
}

#[async_trait::async_trait]
impl BrokerConnection for AmqpConnection {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>> {
        let channel = self
            .connection
            .create_channel()
            .await
            .context("Failed to open AMQP channel")?;
        Ok(Box::new(AmqpChannel { channel }))
    }

    async fn close(&self) -> Result<()> {
        if !self.connection.status().connected() {
            return Ok(());
        }
        self.connection
            .close(REPLY_SUCCESS, "bucketsyncd shutting down")
            .await
            .context("Failed to close AMQP connection")
    }
}

struct AmqpChannel {
    channel: Channel,
}

#[async_trait::async_trait]
impl BrokerChannel for AmqpChannel {
    async fn bind(&self, binding: &QueueBinding) -> Result<()> {
        self.channel
            .queue_bind(
                &binding.queue,
                &binding.exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to bind queue '{}' to exchange '{}'",
                    binding.queue, binding.exchange
                )
            })
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let options = BasicConsumeOptions {
            no_ack: false,
            exclusive: false,
            ..BasicConsumeOptions::default()
        };

        let consumer = self
            .channel
            .basic_consume(queue, consumer_tag, options, FieldTable::default())
            .await
            .with_context(|| format!("Failed to consume from queue '{queue}'"))?;

        let deliveries = consumer
            .map_ok(|delivery| {
                Delivery::new(
                    delivery.delivery_tag,
                    delivery.data,
                    Box::new(AmqpAcker {
                        acker: delivery.acker,
                    }),
                )
            })
            .map_err(anyhow::Error::from)
            .boxed();

        Ok(deliveries)
    }
}

struct AmqpAcker {
    acker: Acker,
}

#[async_trait::async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .context("Failed to acknowledge delivery")
    }

    async fn reject(&self, requeue: bool) -> Result<()> {
        self.acker
            .reject(BasicRejectOptions { requeue })
            .await
            .context("Failed to reject delivery")
    }
}
