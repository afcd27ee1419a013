// src/rabbitmq/connection.rs
//! Owns the single broker connection: connect, notice unexpected loss,
//! reconnect on a fixed delay, and run units of work on throwaway channels.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use super::amqp_client::{AmqpChannel, Broker, BrokerConnection, ShutdownSignal};
use super::errors::ExecuteError;
use super::tokio_exec::{Job, RetryExecutor, TokioExecutor};
use super::unit_of_work::UnitOfWork;
use crate::config::{ConnectionConfig, ReconnectSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Stopped,
}

struct ManagedConnection {
    // Distinguishes this connection from earlier ones in shutdown callbacks.
    generation: u64,
    connection: Arc<dyn BrokerConnection>,
}

struct Inner {
    broker: Arc<dyn Broker>,
    config: ConnectionConfig,
    reconnect_delay: Duration,
    executor: Arc<dyn RetryExecutor>,
    connection: RwLock<Option<Arc<ManagedConnection>>>,
    // Serializes connect attempts, whether caller-issued or from the retry runner.
    connect_lock: AsyncMutex<()>,
    retry_pending: AtomicBool,
    stopped: AtomicBool,
    generation: AtomicU64,
}

pub struct ConnectionManagerBuilder {
    broker: Arc<dyn Broker>,
    config: ConnectionConfig,
    reconnect_delay: Duration,
    executor: Option<Arc<dyn RetryExecutor>>,
}

impl ConnectionManagerBuilder {
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn reconnect_settings(self, settings: &ReconnectSettings) -> Self {
        self.reconnect_delay(settings.delay())
    }

    pub fn executor(mut self, executor: Arc<dyn RetryExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Falls back to a [`TokioExecutor`], so without an explicit executor this
    /// must run inside a Tokio runtime.
    pub fn build(self) -> ConnectionManager {
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(TokioExecutor::new()));

        debug!(
            endpoint = %self.config.endpoint(),
            vhost = %self.config.vhost,
            reconnect_delay_secs = self.reconnect_delay.as_secs(),
            "Creating connection manager"
        );

        ConnectionManager {
            inner: Arc::new(Inner {
                broker: self.broker,
                config: self.config,
                reconnect_delay: self.reconnect_delay,
                executor,
                connection: RwLock::new(None),
                connect_lock: AsyncMutex::new(()),
                retry_pending: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }
}

/// Resilient owner of one broker connection. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new<B: Broker>(broker: B, config: ConnectionConfig) -> Self {
        Self::builder(Arc::new(broker), config).build()
    }

    pub fn builder(broker: Arc<dyn Broker>, config: ConnectionConfig) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            broker,
            config,
            reconnect_delay: ReconnectSettings::default().delay(),
            executor: None,
        }
    }

    /// Connects, or logs the failure and schedules a retry. Never fails.
    pub async fn start(&self) {
        self.inner.start().await;
    }

    /// Cancels pending retries and closes the held connection, if any.
    /// Terminal: the manager never reconnects afterwards.
    pub async fn stop(&self) {
        let inner = &self.inner;
        inner.stopped.store(true, Ordering::SeqCst);
        inner.executor.shutdown_now();
        inner.retry_pending.store(false, Ordering::SeqCst);

        if let Some(managed) = inner.take_current() {
            inner.close_connection(&managed).await;
        }
        debug!(endpoint = %inner.config.endpoint(), "Connection manager stopped");
    }

    /// Runs `work` on a fresh channel of the current connection.
    ///
    /// The channel is closed once `work` finishes, whatever the outcome, and a
    /// failed close never replaces the result of `work`. With no connection
    /// held no channel is created and [`ExecuteError::NotConnected`] is returned.
    pub async fn execute<W: UnitOfWork>(&self, work: W) -> Result<W::Output, ExecuteError> {
        let Some(managed) = self.inner.current() else {
            debug!(description = %work.description(), "No connection held, skipping unit of work");
            return Err(ExecuteError::NotConnected);
        };

        let channel = match managed.connection.create_channel().await {
            Ok(channel) => channel,
            Err(err) => {
                error!(description = %work.description(), error = %err, "Failed to create channel");
                return Err(ExecuteError::ChannelUnavailable(err));
            }
        };

        let outcome = AssertUnwindSafe(work.run(channel.as_ref())).catch_unwind().await;
        close_channel(channel.as_ref()).await;

        match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(source)) => {
                let description = work.description();
                error!(
                    description = %description,
                    channel_id = channel.id(),
                    error = %source,
                    "Failed to run unit of work"
                );
                Err(ExecuteError::Operation { description, source })
            }
            Err(_) => {
                let description = work.description();
                error!(description = %description, channel_id = channel.id(), "Unit of work panicked");
                Err(ExecuteError::Panicked { description })
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        if self.inner.stopped.load(Ordering::SeqCst) {
            ConnectionState::Stopped
        } else if self.inner.current().is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn has_pending_retry(&self) -> bool {
        self.inner.retry_pending.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }
}

impl Inner {
    fn current(&self) -> Option<Arc<ManagedConnection>> {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_current(&self, managed: Arc<ManagedConnection>) {
        *self.connection.write().unwrap_or_else(PoisonError::into_inner) = Some(managed);
    }

    fn take_current(&self) -> Option<Arc<ManagedConnection>> {
        self.connection
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Clears the held connection only if it is still `generation`.
    fn clear_if_current(&self, generation: u64) -> bool {
        let mut current = self.connection.write().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(managed) if managed.generation == generation => {
                *current = None;
                true
            }
            _ => false,
        }
    }

    async fn start(self: &Arc<Self>) {
        let _connecting = self.connect_lock.lock().await;

        if self.stopped.load(Ordering::SeqCst) {
            warn!(endpoint = %self.config.endpoint(), "Connection manager is stopped, not connecting");
            return;
        }
        if self.current().is_some() {
            debug!(endpoint = %self.config.endpoint(), "Already connected");
            return;
        }

        match self.broker.connect(&self.config).await {
            Ok(connection) => self.install(connection).await,
            Err(err) => {
                error!(endpoint = %self.config.endpoint(), error = %err, "Failed to connect to RabbitMQ");
                self.schedule_reconnect();
            }
        }
    }

    async fn install(self: &Arc<Self>, connection: Arc<dyn BrokerConnection>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_current(Arc::new(ManagedConnection {
            generation,
            connection: Arc::clone(&connection),
        }));

        let weak: Weak<Inner> = Arc::downgrade(self);
        connection.on_shutdown(Box::new(move |signal: ShutdownSignal| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_shutdown(generation, signal);
            }
        }));

        // stop() may have run while the connect was in flight.
        if self.stopped.load(Ordering::SeqCst) {
            if let Some(managed) = self.take_current() {
                self.close_connection(&managed).await;
            }
            return;
        }

        // A loss before the listener was registered is never reported to it.
        if !connection.is_connected() {
            self.handle_shutdown(
                generation,
                ShutdownSignal::unexpected("connection lost before shutdown listener was registered"),
            );
            return;
        }

        info!(endpoint = %self.config.endpoint(), vhost = %self.config.vhost, "Connected to RabbitMQ");
    }

    /// Runs on the client's callback context: only touches shared state and
    /// queues a retry.
    fn handle_shutdown(self: &Arc<Self>, generation: u64, signal: ShutdownSignal) {
        if signal.initiated_by_application {
            debug!(reason = %signal.reason, "Connection closed by application");
            return;
        }
        if self.stopped.load(Ordering::SeqCst) {
            debug!(reason = %signal.reason, "Ignoring connection loss after stop");
            return;
        }
        if !self.clear_if_current(generation) {
            debug!(generation, "Ignoring shutdown of a connection that is no longer held");
            return;
        }

        error!(endpoint = %self.config.endpoint(), reason = %signal.reason, "Lost connection to RabbitMQ");
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        if self.retry_pending.swap(true, Ordering::SeqCst) {
            debug!("Reconnect already scheduled");
            return;
        }

        if self.executor.schedule(self.reconnect_delay, reconnect_job(Arc::downgrade(self))) {
            info!(
                endpoint = %self.config.endpoint(),
                delay_secs = self.reconnect_delay.as_secs(),
                "Scheduled reconnect"
            );
        } else {
            self.retry_pending.store(false, Ordering::SeqCst);
        }
    }

    async fn close_connection(&self, managed: &ManagedConnection) {
        match managed.connection.close().await {
            Ok(()) => info!(endpoint = %self.config.endpoint(), "Closed RabbitMQ connection"),
            Err(err) => error!(endpoint = %self.config.endpoint(), error = %err, "Failed to close connection"),
        }
    }
}

fn reconnect_job(inner: Weak<Inner>) -> Job {
    Box::pin(async move {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.retry_pending.store(false, Ordering::SeqCst);
        info!(endpoint = %inner.config.endpoint(), "Attempting to reconnect to RabbitMQ");
        inner.start().await;
    })
}

async fn close_channel(channel: &dyn AmqpChannel) {
    // A channel the broker already closed cannot be closed again.
    if !channel.is_open() {
        debug!(channel_id = channel.id(), "Channel already closed");
        return;
    }
    if let Err(err) = channel.close().await {
        error!(channel_id = channel.id(), error = %err, "Failed to close channel");
    }
}
