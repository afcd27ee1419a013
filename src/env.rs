use std::env;

use anyhow::{Context, Result};
use dotenv::dotenv;

use crate::config::{
    default_host, default_password, default_port, default_reconnect_delay_secs, default_username,
    default_vhost, ConnectionConfig, RabbitConfig, ReconnectSettings,
};

pub const HOST_VAR: &str = "RABBITMQ_HOST";
pub const PORT_VAR: &str = "RABBITMQ_PORT";
pub const VHOST_VAR: &str = "RABBITMQ_VHOST";
pub const USERNAME_VAR: &str = "RABBITMQ_USERNAME";
pub const PASSWORD_VAR: &str = "RABBITMQ_PASSWORD";
pub const RECONNECT_DELAY_VAR: &str = "RABBITMQ_RECONNECT_DELAY_SECONDS";

/// Builds the configuration from the process environment, reading `.env` first.
pub fn load_from_env() -> Result<RabbitConfig> {
    dotenv().ok();
    from_vars(|name| env::var(name).ok())
}

pub fn from_vars<F>(lookup: F) -> Result<RabbitConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let port = match lookup(PORT_VAR) {
        Some(val) => val.parse().context(format!("{} must be a port number", PORT_VAR))?,
        None => default_port(),
    };
    let delay_secs = match lookup(RECONNECT_DELAY_VAR) {
        Some(val) => val
            .parse()
            .context(format!("{} must be a number of seconds", RECONNECT_DELAY_VAR))?,
        None => default_reconnect_delay_secs(),
    };

    let config = RabbitConfig {
        connection: ConnectionConfig {
            host: lookup(HOST_VAR).unwrap_or_else(default_host),
            port,
            vhost: lookup(VHOST_VAR).unwrap_or_else(default_vhost),
            username: lookup(USERNAME_VAR).unwrap_or_else(default_username),
            password: lookup(PASSWORD_VAR).unwrap_or_else(default_password),
        },
        reconnect: ReconnectSettings { delay_secs },
    };
    crate::config::validate(&config)?;
    Ok(config)
}
