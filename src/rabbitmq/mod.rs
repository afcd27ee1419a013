// src/rabbitmq/mod.rs
// Broker connection management and the client abstraction it runs on

pub mod amqp_client;
pub mod connection;
pub mod errors;
pub mod lapin_broker;
pub mod tokio_exec;
pub mod unit_of_work;

#[cfg(test)]
pub(crate) mod testing;

// Re-export specific items to simplify imports elsewhere
pub use amqp_client::{AmqpChannel, Broker, BrokerConnection, ShutdownSignal};
pub use connection::{ConnectionManager, ConnectionManagerBuilder, ConnectionState};
pub use errors::{BrokerError, ExecuteError, Result};
pub use lapin_broker::LapinBroker;
pub use tokio_exec::{RetryExecutor, TokioExecutor};
pub use unit_of_work::UnitOfWork;
