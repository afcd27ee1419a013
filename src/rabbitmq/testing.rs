// src/rabbitmq/testing.rs
//! In-memory broker and hand-driven retry executor for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::amqp_client::{
    AmqpChannel, Broker, BrokerConnection, ExchangeDeclaration, OutboundMessage, QueueBinding,
    QueueDeclaration, ShutdownListener, ShutdownSignal,
};
use super::errors::{BrokerError, Result};
use super::tokio_exec::{Job, RetryExecutor};
use crate::config::ConnectionConfig;

/// Broker-side state shared by every fake connection and channel.
#[derive(Default)]
struct FakeState {
    fail_connect: AtomicBool,
    fail_channel: AtomicBool,
    fail_channel_close: AtomicBool,
    fail_connection_close: AtomicBool,
    fail_publish: AtomicBool,
    drop_on_connect: AtomicBool,
    connect_attempts: AtomicUsize,
    channels_opened: AtomicUsize,
    channels_closed: AtomicUsize,
    next_channel_id: AtomicU16,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    exchanges: Mutex<HashMap<String, ExchangeDeclaration>>,
    queues: Mutex<HashMap<String, QueueDeclaration>>,
    bindings: Mutex<HashSet<(String, String, String)>>,
    published: Mutex<Vec<OutboundMessage>>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeBroker {
    state: Arc<FakeState>,
}

impl FakeBroker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_channel(&self, fail: bool) {
        self.state.fail_channel.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_channel_close(&self, fail: bool) {
        self.state.fail_channel_close.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_connection_close(&self, fail: bool) {
        self.state.fail_connection_close.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_publish(&self, fail: bool) {
        self.state.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Hands out connections that are already gone, as when the socket dies
    /// right after the handshake.
    pub(crate) fn set_drop_on_connect(&self, drop: bool) {
        self.state.drop_on_connect.store(drop, Ordering::SeqCst);
    }

    pub(crate) fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn channels_opened(&self) -> usize {
        self.state.channels_opened.load(Ordering::SeqCst)
    }

    pub(crate) fn channels_closed(&self) -> usize {
        self.state.channels_closed.load(Ordering::SeqCst)
    }

    pub(crate) fn last_connection(&self) -> Option<Arc<FakeConnection>> {
        self.state.connections.lock().unwrap().last().cloned()
    }

    /// Connections neither closed by us nor dropped by the "broker".
    pub(crate) fn live_connections(&self) -> usize {
        self.state
            .connections
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.is_live())
            .count()
    }

    pub(crate) fn exchange(&self, name: &str) -> Option<ExchangeDeclaration> {
        self.state.exchanges.lock().unwrap().get(name).cloned()
    }

    pub(crate) fn queue(&self, name: &str) -> Option<QueueDeclaration> {
        self.state.queues.lock().unwrap().get(name).cloned()
    }

    pub(crate) fn queue_count(&self) -> usize {
        self.state.queues.lock().unwrap().len()
    }

    pub(crate) fn bindings(&self) -> Vec<QueueBinding> {
        self.state
            .bindings
            .lock()
            .unwrap()
            .iter()
            .map(|(queue, exchange, routing_key)| QueueBinding {
                queue: queue.clone(),
                exchange: exchange.clone(),
                routing_key: routing_key.clone(),
            })
            .collect()
    }

    pub(crate) fn published(&self) -> Vec<OutboundMessage> {
        self.state.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Arc<dyn BrokerConnection>> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);
        // let other callers interleave, like a real handshake would
        tokio::task::yield_now().await;
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionError("Connection refused".into()));
        }

        let connection = Arc::new(FakeConnection {
            state: Arc::clone(&self.state),
            listeners: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            dropped: AtomicBool::new(self.state.drop_on_connect.load(Ordering::SeqCst)),
        });
        self.state.connections.lock().unwrap().push(Arc::clone(&connection));
        Ok(connection)
    }
}

pub(crate) struct FakeConnection {
    state: Arc<FakeState>,
    listeners: Mutex<Vec<ShutdownListener>>,
    closed: AtomicBool,
    dropped: AtomicBool,
}

impl FakeConnection {
    /// Delivers `signal` to every registered listener, as the client would.
    pub(crate) fn fire(&self, signal: ShutdownSignal) {
        if !signal.initiated_by_application {
            self.dropped.store(true, Ordering::SeqCst);
        }
        for listener in self.listeners.lock().unwrap().iter() {
            listener(signal.clone());
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn is_live(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.dropped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerConnection for FakeConnection {
    fn on_shutdown(&self, listener: ShutdownListener) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn is_connected(&self) -> bool {
        self.is_live()
    }

    async fn create_channel(&self) -> Result<Box<dyn AmqpChannel>> {
        if self.state.fail_channel.load(Ordering::SeqCst) || !self.is_live() {
            return Err(BrokerError::ChannelError("channel allocation refused".into()));
        }
        self.state.channels_opened.fetch_add(1, Ordering::SeqCst);
        let id = self.state.next_channel_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(FakeChannel {
            id,
            state: Arc::clone(&self.state),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.fire(ShutdownSignal::by_application("closed by application"));
        if self.state.fail_connection_close.load(Ordering::SeqCst) {
            return Err(BrokerError::CloseError("socket already gone".into()));
        }
        Ok(())
    }
}

struct FakeChannel {
    id: u16,
    state: Arc<FakeState>,
}

#[async_trait]
impl AmqpChannel for FakeChannel {
    fn id(&self) -> u16 {
        self.id
    }

    fn is_open(&self) -> bool {
        true
    }

    async fn exchange_declare(&self, exchange: &ExchangeDeclaration) -> Result<()> {
        let mut exchanges = self.state.exchanges.lock().unwrap();
        match exchanges.get(&exchange.name) {
            Some(existing) if existing != exchange => Err(BrokerError::DeclareError(format!(
                "PRECONDITION_FAILED - inequivalent arg for exchange '{}'",
                exchange.name
            ))),
            Some(_) => Ok(()),
            None => {
                exchanges.insert(exchange.name.clone(), exchange.clone());
                Ok(())
            }
        }
    }

    async fn queue_declare(&self, queue: &QueueDeclaration) -> Result<()> {
        let mut queues = self.state.queues.lock().unwrap();
        match queues.get(&queue.name) {
            Some(existing) if existing != queue => Err(BrokerError::DeclareError(format!(
                "PRECONDITION_FAILED - inequivalent arg for queue '{}'",
                queue.name
            ))),
            Some(_) => Ok(()),
            None => {
                queues.insert(queue.name.clone(), queue.clone());
                Ok(())
            }
        }
    }

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<()> {
        if !self.state.exchanges.lock().unwrap().contains_key(&binding.exchange) {
            return Err(BrokerError::DeclareError(format!(
                "NOT_FOUND - no exchange '{}'",
                binding.exchange
            )));
        }
        self.state.bindings.lock().unwrap().insert((
            binding.queue.clone(),
            binding.exchange.clone(),
            binding.routing_key.clone(),
        ));
        Ok(())
    }

    async fn basic_publish(&self, message: &OutboundMessage) -> Result<()> {
        if self.state.fail_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::PublishError("channel closed mid-publish".into()));
        }
        self.state.published.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.channels_closed.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_channel_close.load(Ordering::SeqCst) {
            return Err(BrokerError::CloseError(format!("channel {} close timed out", self.id)));
        }
        Ok(())
    }
}

/// Retry executor that only runs jobs when a test asks it to.
#[derive(Default)]
pub(crate) struct ManualExecutor {
    queue: Mutex<VecDeque<(Duration, Job)>>,
    shut_down: AtomicBool,
}

impl ManualExecutor {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn scheduled_delays(&self) -> Vec<Duration> {
        self.queue.lock().unwrap().iter().map(|(delay, _)| *delay).collect()
    }

    /// Runs the oldest queued job as if its delay had elapsed.
    pub(crate) async fn run_next(&self) -> bool {
        let next = self.queue.lock().unwrap().pop_front();
        match next {
            Some((_, job)) => {
                job.await;
                true
            }
            None => false,
        }
    }
}

impl RetryExecutor for ManualExecutor {
    fn schedule(&self, delay: Duration, job: Job) -> bool {
        if self.shut_down.load(Ordering::SeqCst) {
            return false;
        }
        self.queue.lock().unwrap().push_back((delay, job));
        true
    }

    fn shutdown_now(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.queue.lock().unwrap().clear();
    }

    fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}
