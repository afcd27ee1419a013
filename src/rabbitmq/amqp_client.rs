// src/rabbitmq/amqp_client.rs
//! The broker capability set the connection manager is written against.
//!
//! Everything the manager and the messaging facade need from an AMQP client is
//! expressed here as plain declarations plus three traits, so the manager never
//! touches a concrete client. [`LapinBroker`](super::lapin_broker::LapinBroker)
//! is the production implementation.

use std::sync::Arc;

use async_trait::async_trait;

use super::errors::Result;
use crate::config::ConnectionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDeclaration {
    pub name: String,
    pub kind: ExchangeType,
    /// Survives a broker restart.
    pub durable: bool,
    /// Deleted once the last queue is unbound.
    pub auto_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclaration {
    pub name: String,
    pub durable: bool,
    /// Only usable by the declaring connection.
    pub exclusive: bool,
    pub auto_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Persistent,
}

impl DeliveryMode {
    /// AMQP 0-9-1 `delivery-mode` property value.
    pub fn as_u8(&self) -> u8 {
        match self {
            DeliveryMode::Persistent => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProperties {
    pub content_type: String,
    pub content_encoding: String,
    pub message_id: String,
    pub delivery_mode: DeliveryMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub properties: MessageProperties,
}

/// Delivered to shutdown listeners when a connection goes away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownSignal {
    /// `true` when this process closed the connection itself.
    pub initiated_by_application: bool,
    pub reason: String,
}

impl ShutdownSignal {
    pub fn unexpected(reason: impl Into<String>) -> Self {
        Self { initiated_by_application: false, reason: reason.into() }
    }

    pub fn by_application(reason: impl Into<String>) -> Self {
        Self { initiated_by_application: true, reason: reason.into() }
    }
}

/// Called from the client's own callback context; must not block.
pub type ShutdownListener = Box<dyn Fn(ShutdownSignal) + Send + Sync + 'static>;

/// Opens connections.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn BrokerConnection>>;
}

/// One live connection to the broker.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Registers `listener` for shutdowns from now on. Earlier losses are not
    /// replayed; check [`BrokerConnection::is_connected`] afterwards.
    fn on_shutdown(&self, listener: ShutdownListener);

    fn is_connected(&self) -> bool;

    async fn create_channel(&self) -> Result<Box<dyn AmqpChannel>>;

    async fn close(&self) -> Result<()>;
}

/// A channel used for a single unit of work.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    fn id(&self) -> u16;

    fn is_open(&self) -> bool;

    async fn exchange_declare(&self, exchange: &ExchangeDeclaration) -> Result<()>;

    async fn queue_declare(&self, queue: &QueueDeclaration) -> Result<()>;

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<()>;

    async fn basic_publish(&self, message: &OutboundMessage) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
