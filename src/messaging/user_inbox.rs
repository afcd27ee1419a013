// src/messaging/user_inbox.rs
use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use super::types::{
    user_inbox_binding, user_inbox_declaration, user_inbox_queue, UserId, MESSAGE_CONTENT_TYPE,
    MESSAGE_ENCODING, USER_INBOXES_EXCHANGE, USER_INBOXES_EXCHANGE_TYPE,
};
use crate::rabbitmq::amqp_client::{
    AmqpChannel, DeliveryMode, ExchangeDeclaration, MessageProperties, OutboundMessage,
};
use crate::rabbitmq::{ConnectionManager, Result, UnitOfWork};

/// Per-user inbox topology and publishing, each call a single unit of work.
///
/// Holds no connection state; when the broker is unreachable every operation
/// simply reports failure and the caller may try again later.
#[derive(Clone)]
pub struct UserMessageManager {
    connection_manager: ConnectionManager,
}

impl UserMessageManager {
    pub fn new(connection_manager: ConnectionManager) -> Self {
        Self { connection_manager }
    }

    /// Declares the shared inbox exchange. Returns whether it succeeded.
    pub async fn on_application_start(&self) -> bool {
        let declared = self.connection_manager.execute(DeclareInboxesExchange).await.is_ok();
        if declared {
            info!(exchange = USER_INBOXES_EXCHANGE, "Declared user inboxes exchange");
        }
        declared
    }

    /// Declares `user_id`'s inbox queue and binds it to the inbox exchange.
    pub async fn on_user_login(&self, user_id: UserId) -> bool {
        let work = DeclareUserInbox { queue: user_inbox_queue(user_id) };
        self.connection_manager.execute(work).await.is_ok()
    }

    /// Publishes `json_message` to `user_id`'s inbox and returns the generated
    /// message id, or `None` if anything along the way failed.
    pub async fn send_user_message(&self, user_id: UserId, json_message: &str) -> Option<String> {
        let work = SendUserMessage {
            user_id,
            queue: user_inbox_queue(user_id),
            payload: json_message.as_bytes().to_vec(),
        };
        self.connection_manager.execute(work).await.ok()
    }
}

pub(crate) struct DeclareInboxesExchange;

#[async_trait]
impl UnitOfWork for DeclareInboxesExchange {
    type Output = ();

    fn description(&self) -> String {
        format!("Declaring direct exchange: {}", USER_INBOXES_EXCHANGE)
    }

    async fn run(&self, channel: &dyn AmqpChannel) -> Result<()> {
        let exchange = ExchangeDeclaration {
            name: USER_INBOXES_EXCHANGE.to_string(),
            kind: USER_INBOXES_EXCHANGE_TYPE,
            // survive a server restart
            durable: true,
            // keep it even if nobody is using it
            auto_delete: false,
        };
        channel.exchange_declare(&exchange).await
    }
}

pub(crate) struct DeclareUserInbox {
    queue: String,
}

#[async_trait]
impl UnitOfWork for DeclareUserInbox {
    type Output = ();

    fn description(&self) -> String {
        format!(
            "Declaring user queue: {}, binding it to exchange: {}",
            self.queue, USER_INBOXES_EXCHANGE
        )
    }

    async fn run(&self, channel: &dyn AmqpChannel) -> Result<()> {
        declare_user_inbox(channel, &self.queue).await
    }
}

pub(crate) struct SendUserMessage {
    user_id: UserId,
    queue: String,
    payload: Vec<u8>,
}

#[async_trait]
impl UnitOfWork for SendUserMessage {
    type Output = String;

    fn description(&self) -> String {
        format!("Sending message to user: {}", self.user_id)
    }

    async fn run(&self, channel: &dyn AmqpChannel) -> Result<String> {
        // the inbox may not exist yet
        declare_user_inbox(channel, &self.queue).await?;

        let message_id = Uuid::new_v4().to_string();
        let message = OutboundMessage {
            exchange: USER_INBOXES_EXCHANGE.to_string(),
            routing_key: self.queue.clone(),
            payload: self.payload.clone(),
            properties: MessageProperties {
                content_type: MESSAGE_CONTENT_TYPE.to_string(),
                content_encoding: MESSAGE_ENCODING.to_string(),
                message_id: message_id.clone(),
                delivery_mode: DeliveryMode::Persistent,
            },
        };
        channel.basic_publish(&message).await?;

        debug!(user_id = self.user_id, message_id = %message_id, "Published user message");
        Ok(message_id)
    }
}

async fn declare_user_inbox(channel: &dyn AmqpChannel, queue: &str) -> Result<()> {
    channel.queue_declare(&user_inbox_declaration(queue)).await?;
    channel.queue_bind(&user_inbox_binding(queue)).await
}
