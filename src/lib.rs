pub mod config;
pub mod env;
pub mod messaging;
pub mod rabbitmq;

pub use config::{ConnectionConfig, RabbitConfig};
pub use messaging::UserMessageManager;
pub use rabbitmq::{ConnectionManager, ExecuteError, LapinBroker, UnitOfWork};
