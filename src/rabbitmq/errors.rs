// src/rabbitmq/errors.rs

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("RabbitMQ connection error: {0}")]
    ConnectionError(String),

    #[error("RabbitMQ channel error: {0}")]
    ChannelError(String),

    #[error("RabbitMQ declare error: {0}")]
    DeclareError(String),

    #[error("RabbitMQ publish error: {0}")]
    PublishError(String),

    #[error("RabbitMQ close error: {0}")]
    CloseError(String),
}

// Custom Result type for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Why [`ConnectionManager::execute`](super::ConnectionManager::execute) did not
/// produce a result.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("No active RabbitMQ connection")]
    NotConnected,

    #[error("Failed to create channel: {0}")]
    ChannelUnavailable(#[source] BrokerError),

    #[error("Failed to run '{description}': {source}")]
    Operation {
        description: String,
        #[source]
        source: BrokerError,
    },

    #[error("Unit of work '{description}' panicked")]
    Panicked { description: String },
}

impl ExecuteError {
    /// Failures that say nothing about the operation itself and are worth
    /// retrying once the connection is back.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ExecuteError::NotConnected | ExecuteError::ChannelUnavailable(_))
    }
}
