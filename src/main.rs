use anyhow::Result;
use rabbit_inbox::config::{self, RabbitConfig};
use rabbit_inbox::{env, ConnectionManager, LapinBroker, UserMessageManager};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn load_settings() -> Result<RabbitConfig> {
    match config::load_config() {
        Ok(config) => Ok(config),
        Err(e) => {
            warn!("{:#}; falling back to environment", e);
            env::load_from_env()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings()?;
    info!(
        endpoint = %settings.connection.endpoint(),
        vhost = %settings.connection.vhost,
        "Loaded RabbitMQ configuration"
    );

    let manager = ConnectionManager::builder(Arc::new(LapinBroker::new()), settings.connection.clone())
        .reconnect_settings(&settings.reconnect)
        .build();
    manager.start().await;

    let messaging = UserMessageManager::new(manager.clone());
    if !messaging.on_application_start().await {
        warn!("User inboxes exchange not declared yet, broker unavailable");
    }

    info!("Service running. Press Ctrl+C to exit.");
    tokio::signal::ctrl_c().await?;

    info!(endpoint = %manager.config().endpoint(), "Shutting down...");
    manager.stop().await;

    Ok(())
}
