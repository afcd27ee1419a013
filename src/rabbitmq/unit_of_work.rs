// src/rabbitmq/unit_of_work.rs
use async_trait::async_trait;

use super::amqp_client::AmqpChannel;
use super::errors::Result;

/// One operation run on a fresh channel by
/// [`ConnectionManager::execute`](super::ConnectionManager::execute).
///
/// The channel is owned by the manager and closed after `run` returns, so
/// implementations must not keep it around.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Output: Send;

    /// Human readable summary used in failure logs.
    fn description(&self) -> String;

    async fn run(&self, channel: &dyn AmqpChannel) -> Result<Self::Output>;
}
