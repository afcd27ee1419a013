// src/messaging/types.rs
use crate::rabbitmq::amqp_client::{ExchangeType, QueueBinding, QueueDeclaration};

/// Direct exchange every user inbox queue is bound to.
pub const USER_INBOXES_EXCHANGE: &str = "user-inboxes";
pub const USER_INBOXES_EXCHANGE_TYPE: ExchangeType = ExchangeType::Direct;
pub const USER_INBOX_QUEUE_PREFIX: &str = "user-inbox.";
pub const MESSAGE_CONTENT_TYPE: &str = "application/vnd.ccm.pmsg.v1+json";
pub const MESSAGE_ENCODING: &str = "UTF-8";

pub type UserId = i64;

/// Queue name and routing key of a user's inbox.
pub fn user_inbox_queue(user_id: UserId) -> String {
    format!("{}{}", USER_INBOX_QUEUE_PREFIX, user_id)
}

pub(crate) fn user_inbox_declaration(queue: &str) -> QueueDeclaration {
    QueueDeclaration {
        name: queue.to_string(),
        durable: true,
        // consumable from any connection
        exclusive: false,
        auto_delete: false,
    }
}

pub(crate) fn user_inbox_binding(queue: &str) -> QueueBinding {
    QueueBinding {
        queue: queue.to_string(),
        exchange: USER_INBOXES_EXCHANGE.to_string(),
        routing_key: queue.to_string(),
    }
}
