//! AMQP 0-9-1 sessions via lapin

use async_trait::async_trait;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use tracing::debug;

use crate::broker::{Connector, Session};
use crate::error::BrokerError;

/// Connects to RabbitMQ-compatible brokers
#[derive(Debug, Default, Clone)]
pub struct AmqpConnector;

impl AmqpConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Bare host names get the default port, vhost and credentials
pub fn amqp_uri(host: &str) -> String {
    if host.contains("://") {
        host.to_string()
    } else {
        format!("amqp://{}", host)
    }
}

pub struct AmqpSession {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl Connector for AmqpConnector {
    type Session = AmqpSession;

    async fn connect(&self, host: &str) -> Result<AmqpSession, BrokerError> {
        let uri = amqp_uri(host);
        let connection = Connection::connect(&uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        debug!(channel = channel.id(), "Opened AMQP channel");
        Ok(AmqpSession {
            connection,
            channel,
        })
    }
}

impl AmqpSession {
    /// Bind a fresh exclusive, server-named queue to `exchange` and consume it.
    ///
    /// Deliveries are auto-acked; the queue disappears with the connection.
    pub async fn subscribe(&self, exchange: &str, tag: &str) -> Result<Consumer, BrokerError> {
        let queue = self
            .channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        let queue = queue.name().as_str();

        self.channel
            .queue_bind(
                queue,
                exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        debug!(queue, exchange, "Bound subscriber queue");

        let consumer = self
            .channel
            .basic_consume(
                queue,
                tag,
                BasicConsumeOptions {
                    no_ack: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(consumer)
    }
}

#[async_trait]
impl Session for AmqpSession {
    async fn declare_fanout(&mut self, exchange: &str) -> Result<(), BrokerError> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn publish(&mut self, exchange: &str, body: &[u8]) -> Result<(), BrokerError> {
        // The channel is not in confirm mode, the returned confirm is dropped
        self.channel
            .basic_publish(
                exchange,
                "",
                BasicPublishOptions::default(),
                body,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.connection.close(200, "Bye").await?;
        Ok(())
    }
}
