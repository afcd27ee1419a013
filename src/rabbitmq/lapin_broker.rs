// src/rabbitmq/lapin_broker.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lapin::{
    options::{
        BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::{debug, warn};

use super::amqp_client::{
    AmqpChannel, Broker, BrokerConnection, ExchangeDeclaration, ExchangeType, OutboundMessage,
    QueueBinding, QueueDeclaration, ShutdownListener, ShutdownSignal,
};
use super::errors::{BrokerError, Result};
use crate::config::ConnectionConfig;

const REPLY_SUCCESS: u16 = 200;

/// [`Broker`] backed by a real RabbitMQ server through lapin.
#[derive(Clone, Default)]
pub struct LapinBroker {
    properties: ConnectionProperties,
}

impl LapinBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Broker for LapinBroker {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn BrokerConnection>> {
        debug!(host = %config.host, port = config.port, vhost = %config.vhost, "Opening AMQP connection");
        let connection = Connection::connect_uri(config.amqp_uri(), self.properties.clone())
            .await
            .map_err(|e| BrokerError::ConnectionError(format!("Failed to connect: {}", e)))?;

        Ok(Arc::new(LapinConnection {
            connection,
            closing: Arc::new(AtomicBool::new(false)),
        }))
    }
}

pub struct LapinConnection {
    connection: Connection,
    // Set before we close the connection ourselves, so the error callback can
    // tell our own close apart from a broker or network failure.
    closing: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    fn on_shutdown(&self, listener: ShutdownListener) {
        let closing = Arc::clone(&self.closing);
        self.connection.on_error(move |err| {
            let signal = ShutdownSignal {
                initiated_by_application: closing.load(Ordering::SeqCst),
                reason: err.to_string(),
            };
            listener(signal);
        });
    }

    fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    async fn create_channel(&self) -> Result<Box<dyn AmqpChannel>> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::ChannelError(format!("Failed to create channel: {}", e)))?;
        Ok(Box::new(LapinChannel { channel }))
    }

    async fn close(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        if !self.connection.status().connected() {
            warn!("Connection already closed");
            return Ok(());
        }
        self.connection
            .close(REPLY_SUCCESS, "Closing connection")
            .await
            .map_err(|e| BrokerError::CloseError(e.to_string()))
    }
}

pub struct LapinChannel {
    channel: Channel,
}

fn exchange_kind(kind: ExchangeType) -> ExchangeKind {
    match kind {
        ExchangeType::Direct => ExchangeKind::Direct,
    }
}

pub(crate) fn basic_properties(message: &OutboundMessage) -> BasicProperties {
    let props = &message.properties;
    BasicProperties::default()
        .with_content_type(props.content_type.as_str().into())
        .with_content_encoding(props.content_encoding.as_str().into())
        .with_message_id(props.message_id.as_str().into())
        .with_delivery_mode(props.delivery_mode.as_u8())
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    fn id(&self) -> u16 {
        self.channel.id()
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }

    async fn exchange_declare(&self, exchange: &ExchangeDeclaration) -> Result<()> {
        self.channel
            .exchange_declare(
                &exchange.name,
                exchange_kind(exchange.kind),
                ExchangeDeclareOptions {
                    durable: exchange.durable,
                    auto_delete: exchange.auto_delete,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                BrokerError::DeclareError(format!("Failed to declare exchange {}: {}", exchange.name, e))
            })
    }

    async fn queue_declare(&self, queue: &QueueDeclaration) -> Result<()> {
        self.channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    durable: queue.durable,
                    exclusive: queue.exclusive,
                    auto_delete: queue.auto_delete,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::DeclareError(format!("Failed to declare queue {}: {}", queue.name, e)))
    }

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<()> {
        self.channel
            .queue_bind(
                &binding.queue,
                &binding.exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                BrokerError::DeclareError(format!(
                    "Failed to bind queue {} to {}: {}",
                    binding.queue, binding.exchange, e
                ))
            })
    }

    async fn basic_publish(&self, message: &OutboundMessage) -> Result<()> {
        self.channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.payload,
                basic_properties(message),
            )
            .await
            .map_err(|e| BrokerError::PublishError(e.to_string()))?
            .await
            .map_err(|e| BrokerError::PublishError(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.channel
            .close(REPLY_SUCCESS, "Unit of work complete")
            .await
            .map_err(|e| BrokerError::CloseError(format!("Failed to close channel {}: {}", self.channel.id(), e)))
    }
}
