// src/config.rs
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const CONFIG_FILE_NAME: &str = "RabbitInbox.json";

// Configuration structures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RabbitConfig {
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

/// Where and as whom to connect. Created once at startup and never mutated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_reconnect_delay_secs")]
    pub delay_secs: u64,
}

// Default values
pub(crate) fn default_host() -> String { "localhost".to_string() }
pub(crate) fn default_port() -> u16 { 5672 }
pub(crate) fn default_vhost() -> String { "/".to_string() }
pub(crate) fn default_username() -> String { "guest".to_string() }
pub(crate) fn default_password() -> String { "guest".to_string() }
pub(crate) fn default_reconnect_delay_secs() -> u64 { 15 }

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            vhost: default_vhost(),
            username: default_username(),
            password: default_password(),
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self { delay_secs: default_reconnect_delay_secs() }
    }
}

impl ReconnectSettings {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

impl ConnectionConfig {
    /// `host:port`, used in log lines.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Structured URI handed to lapin, so the vhost never needs percent-encoding.
    pub fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.username.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            ..AMQPUri::default()
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("vhost", &self.vhost)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// Configuration loading and management functions
pub fn find_config_file() -> Result<PathBuf> {
    // Check various locations
    let alternative = Path::new("config").join(CONFIG_FILE_NAME);
    let locations = [
        ("Current directory", Path::new(CONFIG_FILE_NAME)),
        ("Current directory (alternative)", alternative.as_path()),
    ];

    for (location_name, path) in locations.iter() {
        if path.exists() {
            debug!("Found config file in {}: {}", location_name, path.display());
            return Ok(path.to_path_buf());
        }
    }

    // Try the user's home directory
    if let Some(home_dir) = home::home_dir() {
        let home_config = home_dir.join(format!(".{}", CONFIG_FILE_NAME));
        if home_config.exists() {
            debug!("Found config file in home directory: {}", home_config.display());
            return Ok(home_config);
        }
    }

    Err(anyhow!(
        "Could not find {} in the current directory, config/ or your home directory",
        CONFIG_FILE_NAME
    ))
}

pub fn load_config() -> Result<RabbitConfig> {
    let config_path = find_config_file()?;
    load_config_from(&config_path)
}

pub fn load_config_from(config_path: &Path) -> Result<RabbitConfig> {
    let config_content = fs::read_to_string(config_path)
        .context(format!("Failed to read config file at {}", config_path.display()))?;

    let config: RabbitConfig = serde_json::from_str(&config_content)
        .context("Configuration file contains invalid JSON or missing required fields")?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &RabbitConfig) -> Result<()> {
    if config.connection.host.is_empty() {
        return Err(anyhow!("Configuration error: connection.host cannot be empty"));
    }
    if config.connection.port == 0 {
        return Err(anyhow!("Configuration error: connection.port cannot be 0"));
    }
    Ok(())
}

pub fn create_default_config_file(path: &Path) -> Result<()> {
    let default_config = RabbitConfig {
        connection: ConnectionConfig::default(),
        reconnect: ReconnectSettings::default(),
    };

    let json = serde_json::to_string_pretty(&default_config)
        .context("Failed to serialize default configuration")?;

    // Create parent directories if they don't exist
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create directory at {}", parent.display()))?;
        }
    }

    fs::write(path, json)
        .context(format!("Failed to write configuration to {}", path.display()))?;

    info!("Created default configuration file at: {}", path.display());
    Ok(())
}
